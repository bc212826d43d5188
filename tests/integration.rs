use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[output]
dir = "{}/out"
prefix = "test"

[transport]
max_attempts = 1
retry_delay_ms = 1
page_delay_ms = 0
timeout_secs = 5

[normalize]
target_city = "Dubai"
listing_url_template = "https://example.com/listing-{{id}}.html"

[partitions]
attribute = "price"
bounds = [20000, 50000]
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");
    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn hit(id: &str, price: u64, city: &str) -> serde_json::Value {
    serde_json::json!({
        "objectID": id,
        "externalID": format!("ext-{}", id),
        "price": price,
        "location": [
            {"level": 0, "externalID": "0", "name": "UAE"},
            {"level": 1, "externalID": "1", "name": city}
        ],
        "category": [{"level": 0, "externalID": "1", "name": "Residential"}],
        "createdAt": 1700000000
    })
}

/// Fake search API: page 0 of each band has hits, later pages are empty.
fn spawn_search_api() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut body);
            let request: serde_json::Value =
                serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

            let filters = request["filters"].as_str().unwrap_or("");
            let hits = if request["page"].as_u64() != Some(0) {
                vec![]
            } else if filters.ends_with("price < 20000") {
                vec![hit("a", 12000, "Dubai"), hit("b", 15000, "Sharjah")]
            } else if filters.ends_with("price >= 50000") {
                vec![hit("c", 90000, "Dubai")]
            } else {
                vec![]
            };
            let payload = serde_json::json!({"hits": hits, "nbHits": hits.len()}).to_string();

            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                payload.len(),
                payload
            );
            let _ = stream.write_all(reply.as_bytes());
        }
    });

    format!("http://{}/1/indexes/test/query", addr)
}

#[test]
fn test_plan_lists_bands() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(&config_path, &["plan"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("price_0_20000"));
    assert!(stdout.contains("price_20000_50000"));
    assert!(stdout.contains("price_50000_plus"));
    assert!(stdout.contains("price >= 20000 AND price < 50000"));
    assert!(stdout.contains("3 partitions"));
}

#[test]
fn test_invalid_plan_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[output]\ndir = \"out\"\n\n[partitions]\nbounds = [50000, 20000]\n",
    )
    .unwrap();

    let (_, stderr, success) = run_harvest(&config_path, &["plan"]);
    assert!(!success);
    assert!(stderr.contains("partitions"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvest(&tmp.path().join("absent.toml"), &["plan"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_run_api_without_section_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_harvest(&config_path, &["run", "api"]);
    assert!(!success);
    assert!(stderr.contains("[api]"), "stderr: {}", stderr);
}

#[test]
fn test_run_api_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_search_api();
    let config_path = write_config(
        tmp.path(),
        &format!(
            r#"
[api]
app_id = "TEST"
api_key = "secret"
index_name = "test"
endpoint = "{}"
hits_per_page = 10
"#,
            endpoint
        ),
    );

    let (stdout, stderr, success) = run_harvest(&config_path, &["run", "api"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("partitions: 3 written, 0 failed"));
    assert!(stdout.contains("fetched: 3 listings"));
    assert!(stdout.contains("kept: 2 records"));
    assert!(stdout.ends_with("ok\n"));

    let out_dir = tmp.path().join("out");
    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 4, "files: {:?}", names);
    assert!(names[0].starts_with("test-all_listings_"));
    assert!(names[1].starts_with("test_listings_price_0_20000_"));

    let merged = fs::read_to_string(out_dir.join(&names[0])).unwrap();
    let lines: Vec<&str> = merged.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("objectID,"));
    assert!(lines[0].ends_with(",scrape_date"));
    assert!(lines[1].starts_with("a,"));
    assert!(lines[1].contains("https://example.com/listing-ext-a.html"));
    assert!(lines[1].contains("2023-11-14 22:13:20"));
    assert!(lines[2].starts_with("c,"));
}

#[test]
fn test_consolidate_rereads_units() {
    let (tmp, config_path) = setup_test_env();
    let out_dir = tmp.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();

    let (stdout, _, success) = run_harvest(&config_path, &["consolidate"]);
    assert!(!success, "consolidating an empty dir should fail: {}", stdout);

    let header = "objectID,title,scrape_date";
    fs::write(
        out_dir.join("test_listings_low_2024-05-01.csv"),
        format!("{}\n1,One,2024-05-01 10:00:00\n2,Two,2024-05-01 10:00:00\n", header),
    )
    .unwrap();
    fs::write(
        out_dir.join("test_listings_high_2024-05-01.csv"),
        format!("{}\n3,Three,2024-05-01 10:00:00\n", header),
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_harvest(&config_path, &["consolidate", "--date", "2024-05-01"]);
    assert!(success, "consolidate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("units: 2"));
    assert!(stdout.contains("dataset: 3 rows"));

    let merged = fs::read_to_string(out_dir.join("test-all_listings_2024-05-01.csv")).unwrap();
    let ids: Vec<&str> = merged
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    // Units are merged in file-name order
    assert_eq!(ids, vec!["3", "1", "2"]);
}

#[test]
fn test_consolidate_defaults_to_latest_day() {
    let (tmp, config_path) = setup_test_env();
    let out_dir = tmp.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();

    let header = "objectID,title,scrape_date";
    fs::write(
        out_dir.join("test_listings_low_2024-05-01.csv"),
        format!("{}\n1,Old,2024-05-01 10:00:00\n", header),
    )
    .unwrap();
    fs::write(
        out_dir.join("test_listings_low_2024-05-02.csv"),
        format!("{}\n2,New,2024-05-02 10:00:00\n", header),
    )
    .unwrap();

    let (stdout, stderr, success) = run_harvest(&config_path, &["consolidate"]);
    assert!(success, "consolidate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("units: 1"));
    let merged = fs::read_to_string(out_dir.join("test-all_listings_2024-05-02.csv")).unwrap();
    assert_eq!(merged.lines().count(), 2);
    assert!(merged.lines().nth(1).unwrap().starts_with("2,"));
    assert!(!out_dir.join("test-all_listings_2024-05-01.csv").exists());

    let (stdout, stderr, success) = run_harvest(&config_path, &["consolidate", "--all"]);
    assert!(success, "consolidate --all failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("units: 2"));
    assert!(stdout.contains("dataset: 2 rows"));

    let (_, _, success) = run_harvest(
        &config_path,
        &["consolidate", "--all", "--date", "2024-05-01"],
    );
    assert!(!success, "--all and --date are exclusive");
}
