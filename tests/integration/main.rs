//! Integration tests for image-builder

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Command isolated from any user configuration
    fn image_builder(temp: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("image-builder");
        cmd.env("IMAGE_BUILDER_CONFIG", temp.join("config.toml"));
        cmd
    }

    fn shard(arch: &str, tag: &str) -> String {
        format!(
            r#"{{ "repos": [ {{ "repo": "dotnet/runtime", "images": [ {{ "productVersion": "6.0",
              "platforms": [ {{ "dockerfile": "src/runtime/{arch}/Dockerfile", "architecture": "{arch}",
                "osType": "linux", "osVersion": "bullseye-slim",
                "digest": "dotnet/runtime@sha256:{arch}", "simpleTags": ["{tag}"] }} ] }} ] }} ] }}"#,
            arch = arch,
            tag = tag
        )
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Build, cache and track"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("image-builder"));
    }

    #[test]
    fn config_path_follows_env() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .args(["config", "init"])
            .assert()
            .success();
        assert!(temp.path().join("config.toml").exists());

        image_builder(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("engine = \"docker\""));
    }

    #[test]
    fn invalid_config_fails_with_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[build\n").unwrap();

        image_builder(temp.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn completions_generate() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("image-builder"));
    }

    #[test]
    fn merge_image_info_combines_shards() {
        let temp = TempDir::new().unwrap();
        let shards = temp.path().join("shards");
        fs::create_dir(&shards).unwrap();
        fs::write(shards.join("linux-amd64.json"), shard("amd64", "6.0-amd64")).unwrap();
        fs::write(shards.join("linux-arm64.json"), shard("arm64", "6.0-arm64")).unwrap();
        let destination = temp.path().join("out").join("image-info.json");

        image_builder(temp.path())
            .arg("merge-image-info")
            .arg(&shards)
            .arg(&destination)
            .assert()
            .success();

        let merged = fs::read_to_string(&destination).unwrap();
        assert!(merged.contains("\"architecture\": \"amd64\""));
        assert!(merged.contains("\"architecture\": \"arm64\""));
        assert_eq!(merged.matches("\"productVersion\"").count(), 1);
    }

    #[test]
    fn merge_image_info_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .arg("merge-image-info")
            .arg(temp.path().join("absent"))
            .arg(temp.path().join("image-info.json"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("source folder not found"));
    }

    #[test]
    fn merge_image_info_empty_source_hints() {
        let temp = TempDir::new().unwrap();
        let shards = temp.path().join("shards");
        fs::create_dir(&shards).unwrap();

        image_builder(temp.path())
            .arg("merge-image-info")
            .arg(&shards)
            .arg(temp.path().join("image-info.json"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("No image info files found"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn build_missing_manifest_fails() {
        let temp = TempDir::new().unwrap();
        image_builder(temp.path())
            .args(["build", "--manifest"])
            .arg(temp.path().join("manifest.json"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn stale_images_reports_unbuilt_platforms() {
        let temp = TempDir::new().unwrap();
        let checkout = temp.path().join("checkout");
        fs::create_dir_all(checkout.join("src/app")).unwrap();
        fs::write(checkout.join("src/app/Dockerfile"), "FROM scratch\nCOPY app /\n").unwrap();
        fs::write(
            checkout.join("manifest.json"),
            r#"{ "repos": [ { "name": "app", "images": [ { "platforms": [
                { "dockerfile": "src/app", "os": "linux", "osVersion": "alpine",
                  "tags": { "latest": {} } } ] } ] } ] }"#,
        )
        .unwrap();

        let subscriptions = temp.path().join("subscriptions.json");
        fs::write(
            &subscriptions,
            format!(
                r#"[ {{ "id": "app-main", "manifestPath": "manifest.json", "root": {:?} }} ]"#,
                checkout.display().to_string()
            ),
        )
        .unwrap();

        image_builder(temp.path())
            .arg("get-stale-images")
            .arg("--subscriptions")
            .arg(&subscriptions)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"subscription\": \"app-main\""))
            .stdout(predicate::str::contains("src/app/Dockerfile"));
    }
}
