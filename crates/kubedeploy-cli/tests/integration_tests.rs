//! Integration tests for the kubernetes-deploy binary
//!
//! These only exercise paths that fail before any cluster contact, so they
//! run without a kubectl binary or a cluster.

use std::fs;
use std::process::Command;

/// Helper to run kubernetes-deploy with a clean deploy environment
fn kubernetes_deploy(args: &[&str], envs: &[(&str, &str)]) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_kubernetes-deploy"));
    command
        .args(args)
        .env_remove("REVISION")
        .env_remove("ENVIRONMENT")
        .env_remove("KUBECONFIG");
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().expect("Failed to execute kubernetes-deploy")
}

struct Fixture {
    _dir: tempfile::TempDir,
    kubeconfig: String,
    template_dir: String,
}

fn fixture() -> Fixture {
    let dir = tempfile::TempDir::new().unwrap();
    let kubeconfig = dir.path().join("kubeconfig");
    fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();
    let template_dir = dir.path().join("templates");
    fs::create_dir(&template_dir).unwrap();
    fs::write(
        template_dir.join("cm.yml"),
        "kind: ConfigMap\nmetadata:\n  name: app-config\n",
    )
    .unwrap();
    Fixture {
        kubeconfig: kubeconfig.to_string_lossy().into_owned(),
        template_dir: template_dir.to_string_lossy().into_owned(),
        _dir: dir,
    }
}

#[test]
fn test_help_succeeds() {
    let output = kubernetes_deploy(&["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--template-dir"));
    assert!(stdout.contains("--skip-wait"));
}

#[test]
fn test_missing_revision_fails() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &["apps", "minikube", "--template-dir", &fixture.template_dir],
        &[("KUBECONFIG", &fixture.kubeconfig)],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("REVISION"));
}

#[test]
fn test_missing_kubeconfig_env_fails() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &["apps", "minikube", "--template-dir", &fixture.template_dir],
        &[("REVISION", "abcdef0123456789")],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("KUBECONFIG"));
}

#[test]
fn test_nonexistent_kubeconfig_fails() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &["apps", "minikube", "--template-dir", &fixture.template_dir],
        &[
            ("REVISION", "abcdef0123456789"),
            ("KUBECONFIG", "/definitely/not/here"),
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("kubeconfig"));
}

#[test]
fn test_protected_namespace_requires_override() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &[
            "kube-system",
            "minikube",
            "--template-dir",
            &fixture.template_dir,
            "--no-prune",
        ],
        &[
            ("REVISION", "abcdef0123456789"),
            ("KUBECONFIG", &fixture.kubeconfig),
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("protected"));
}

#[test]
fn test_protected_namespace_with_prune_rejected_despite_override() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &[
            "kube-system",
            "minikube",
            "--template-dir",
            &fixture.template_dir,
            "--allow-protected-ns",
        ],
        &[
            ("REVISION", "abcdef0123456789"),
            ("KUBECONFIG", &fixture.kubeconfig),
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("prune"));
}

#[test]
fn test_empty_template_dir_fails() {
    let fixture = fixture();
    let empty = tempfile::TempDir::new().unwrap();
    let output = kubernetes_deploy(
        &[
            "apps",
            "minikube",
            "--template-dir",
            &empty.path().to_string_lossy(),
        ],
        &[
            ("REVISION", "abcdef0123456789"),
            ("KUBECONFIG", &fixture.kubeconfig),
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("template"));
}

#[test]
fn test_invalid_bindings_fail() {
    let fixture = fixture();
    let output = kubernetes_deploy(
        &[
            "apps",
            "minikube",
            "--template-dir",
            &fixture.template_dir,
            "--bindings",
            "not-a-pair",
        ],
        &[
            ("REVISION", "abcdef0123456789"),
            ("KUBECONFIG", &fixture.kubeconfig),
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("key=value"));
}
