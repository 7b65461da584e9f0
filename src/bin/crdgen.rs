//! # CRD Generator
//!
//! Prints the `AuthPolicy` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use authpolicy_controller::crd::AuthPolicy;
use kube::core::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&AuthPolicy::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
