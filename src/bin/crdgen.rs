//! Print the CustomResourceDefinitions for both resource kinds as YAML,
//! ready for `kubectl apply -f -`.

use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&dbhub_operator::Database::crd()).unwrap()
    );
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&dbhub_operator::DBHubInstance::crd()).unwrap()
    );
}
