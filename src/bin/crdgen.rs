//! Prints the `ClusterSecret` CRD as YAML.

fn main() {
    match clustersecret_controller::controller::crdgen::crd_yaml() {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
