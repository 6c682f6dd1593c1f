use kube::CustomResourceExt;

use dogu_operator::dogu::Dogu;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Dogu::crd())?);
    Ok(())
}
