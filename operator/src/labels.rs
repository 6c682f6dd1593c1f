use std::collections::BTreeMap;

/// Label key carrying the simple dogu name.
pub const DOGU_LABEL_NAME: &str = "dogu.name";
/// Label key carrying the dogu version on pod templates.
pub const DOGU_LABEL_VERSION: &str = "dogu.version";
/// Label key carrying the dependency a network policy was generated for.
pub const DEPENDENCY_LABEL: &str = "dependency";

/// Create lables that can be used as a unique selector for a given dogu.
pub fn selector_labels(dogu: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![(DOGU_LABEL_NAME.to_owned(), dogu.to_owned())])
}

/// Labels that every resource generated for a dogu carries.
pub fn managed_labels(dogu: &str) -> BTreeMap<String, String> {
    managed_labels_extend(dogu, None)
}

/// Managed labels extended with additional labels.
pub fn managed_labels_extend(
    dogu: &str,
    labels: Option<BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut managed = ces_labels();
    managed.append(&mut selector_labels(dogu));
    if let Some(mut labels) = labels {
        managed.append(&mut labels);
    }
    managed
}

/// Labels that mark a resource as part of the Cloudogu EcoSystem.
pub fn ces_labels() -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![("app".to_owned(), "ces".to_owned())])
}

/// Turn a label map into a label selector string usable in list calls.
pub fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
