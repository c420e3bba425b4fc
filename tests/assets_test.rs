//! Checks on the files shipped next to the binary: the default config, the
//! Python Dockerfile and the seccomp profile.

use codebox_core::config::AppConfig;
use codebox_core::fs_policy::validate_dockerfile_path;
use codebox_sandbox::{SeccompAction, SeccompProfile};

#[test]
fn test_default_config_loads() {
    let config = AppConfig::load().unwrap();
    assert!(config.sandbox.enabled);
    assert_eq!(config.sandbox.build_context, "docker");
    assert_eq!(
        config.sandbox.seccomp_profile_path.as_deref(),
        Some("docker/seccomp-profile.json")
    );
}

#[test]
fn test_shipped_seccomp_profile_is_valid() {
    let profile = SeccompProfile::load("docker/seccomp-profile.json").unwrap();
    assert_eq!(profile.default_action(), SeccompAction::Errno);

    let allowed: Vec<&str> = profile
        .syscalls()
        .iter()
        .filter(|rule| rule.action == SeccompAction::Allow)
        .flat_map(|rule| rule.names.iter().map(String::as_str))
        .collect();
    for needed in ["read", "write", "execve", "mmap", "exit_group"] {
        assert!(allowed.contains(&needed), "{} must be allowed", needed);
    }
    assert!(!allowed.contains(&"ptrace"));
}

#[test]
fn test_python_dockerfile_inside_build_context() {
    let path = validate_dockerfile_path("Dockerfile.python", "docker").unwrap();
    assert!(path.ends_with("docker/Dockerfile.python"));
}
