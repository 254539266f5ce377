//! Prints the Grantflow OpenAPI document as JSON.
//!
//! Usage:
//!   cargo run -p grantflow-api --bin generate-openapi > openapi.json

use grantflow_api::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI document: {}", e);
            std::process::exit(1);
        }
    }
}
