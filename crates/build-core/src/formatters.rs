const MAX_NAME_LEN: usize = 63;
const DIGEST_LEN: usize = 8;

/// Name shared by the service account, role, binding and job of a build:
/// `build-{name}`. Names past the label limit keep a prefix and gain a
/// digest of the full build name, so distinct builds never share objects.
pub fn format_access_name(build_name: &str) -> String {
    let name = format!("build-{}", build_name);
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let digest = sha256::digest(build_name);
    let prefix = name
        .chars()
        .take(MAX_NAME_LEN - DIGEST_LEN - 1)
        .collect::<String>();

    format!(
        "{}-{}",
        prefix.trim_end_matches(['-', '.']),
        &digest[..DIGEST_LEN]
    )
}

/// `/apis/foundry.dev/v1alpha1/namespaces/{ns}/imagebuilds/{name}`
pub fn format_object_link(namespace: &str, name: &str) -> String {
    format!(
        "/apis/foundry.dev/v1alpha1/namespaces/{}/imagebuilds/{}",
        namespace, name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_name_is_prefixed() {
        assert_eq!(format_access_name("web"), "build-web");
    }

    #[test]
    fn test_access_name_is_truncated() {
        let long = "a".repeat(80);
        let name = format_access_name(&long);
        assert_eq!(name.len(), 63);
        assert!(name.starts_with("build-"));
    }

    #[test]
    fn test_access_name_does_not_end_with_dash() {
        let name = format!("{}-{}", "a".repeat(56), "b".repeat(10));
        assert!(!format_access_name(&name).ends_with('-'));
    }

    #[test]
    fn test_long_names_with_shared_prefix_stay_distinct() {
        let prefix = "team-payments-service-release-candidate-pipeline-nightly-build";
        let frontend = format_access_name(&format!("{}-frontend", prefix));
        let backend = format_access_name(&format!("{}-backend", prefix));

        assert_ne!(frontend, backend);
        assert!(frontend.len() <= 63 && backend.len() <= 63);
        assert_eq!(frontend, format_access_name(&format!("{}-frontend", prefix)));
    }

    #[test]
    fn test_short_names_are_not_hashed() {
        let name = "a".repeat(57);
        assert_eq!(format_access_name(&name), format!("build-{}", name));
    }
}
