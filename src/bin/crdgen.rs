use kube::CustomResourceExt;
use vault_k8s::crd::Vault;

fn main() {
    match serde_yaml::to_string(&Vault::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("failed to render Vault CRD: {e}");
            std::process::exit(1);
        }
    }
}
