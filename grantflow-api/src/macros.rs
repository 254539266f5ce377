//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` for a cloneable field of the state, so
/// handlers and middleware can extract just that piece.
///
/// # Example
/// ```ignore
/// impl_from_ref!(WsState, ws);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for WsState {
///     fn from_ref(state: &AppState) -> Self {
///         state.ws.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

/// Reject an empty patch with a 400 before touching the store.
///
/// # Example
/// ```ignore
/// require_changes!(patch);
/// ```
#[macro_export]
macro_rules! require_changes {
    ($patch:expr) => {
        if $patch.is_empty() {
            return Err($crate::error::ApiError::validation_failed(
                "Request contains no fields to update",
            ));
        }
    };
}
