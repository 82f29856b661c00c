//! Purpose: End-to-end tests for the HTTP/JSON server.
//! Exports: None (integration test module).
//! Role: Validate entry lookup, upsert, and error statuses across TCP.
//! Invariants: Uses loopback-only server with a temp table file.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use luadex::api::{FileStore, TableStore, Value as TableValue};
use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

const SEED: &str = r#"_G.Pokemon = {
    ["Pikachu"] = {
        hp = 35,
        type = "Electric",
        moves = { "Thunder Shock", "Quick Attack" },
    },
    ["Bulbasaur"] = {
        hp = 45,
        type = "Grass",
    },
}
"#;

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(file: &Path) -> TestResult<Self> {
        Self::start_with_args(file, &[])
    }

    fn start_with_args(file: &Path, serve_args: &[&str]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_luadex"))
                .arg("--file")
                .arg(file)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .args(serve_args)
                .env("RUST_LOG", "warn")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn seeded_file(dir: &Path) -> TestResult<std::path::PathBuf> {
    let path = dir.join("Pokemon.lua");
    std::fs::write(&path, SEED)?;
    Ok(path)
}

/// Returns status and body for any response, including 4xx/5xx.
fn status_and_json(result: Result<ureq::Response, ureq::Error>) -> TestResult<(u16, Value)> {
    match result {
        Ok(resp) => Ok((resp.status(), resp.into_json()?)),
        Err(ureq::Error::Status(code, resp)) => Ok((code, resp.into_json()?)),
        Err(err) => Err(err.into()),
    }
}

#[test]
fn liveness_route_answers_text() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let resp = ureq::get(&server.url("/")).call()?;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.into_string()?, "Hello, World! The Pokémon API is running.");
    Ok(())
}

#[test]
fn get_returns_entry_fields_in_order() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(ureq::get(&server.url("/pokemon/Pikachu")).call())?;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({
            "hp": 35,
            "type": "Electric",
            "moves": ["Thunder Shock", "Quick Attack"],
        })
    );
    let keys: Vec<&String> = body.as_object().ok_or("object")?.keys().collect();
    assert_eq!(keys, vec!["hp", "type", "moves"]);
    Ok(())
}

#[test]
fn get_missing_entry_is_404() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(ureq::get(&server.url("/pokemon/Mew")).call())?;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["kind"], "NotFound");
    assert_eq!(body["error"]["message"], "Pokémon 'Mew' not found");

    // Lookup is case-sensitive.
    let (status, _) = status_and_json(ureq::get(&server.url("/pokemon/pikachu")).call())?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn get_with_lua_format_returns_table_text() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let resp = ureq::get(&server.url("/pokemon/Bulbasaur"))
        .query("format", "lua")
        .call()?;
    assert_eq!(resp.status(), 200);
    assert!(resp.content_type().starts_with("text/plain"));
    assert_eq!(resp.into_string()?, r#"return { hp = 45, type = "Grass" }"#);
    Ok(())
}

#[test]
fn post_inserts_then_replaces() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .send_json(json!({"name": "Charmander", "data": {"hp": 39, "type": "Fire"}})),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"name": "Charmander", "status": "inserted"}));

    let (status, body) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .send_json(json!({"name": "Pikachu", "data": {"hp": 40}})),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "replaced");

    let (_, pikachu) = status_and_json(ureq::get(&server.url("/pokemon/Pikachu")).call())?;
    assert_eq!(pikachu, json!({"hp": 40}));

    let table = FileStore::new(&file).load()?;
    let names: Vec<&str> = table.names().collect();
    assert_eq!(names, vec!["Pikachu", "Bulbasaur", "Charmander"]);
    assert_eq!(
        table.entries()["Charmander"]["type"],
        TableValue::from("Fire")
    );
    Ok(())
}

#[test]
fn post_tags_non_numbers_as_strings() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let (status, _) = status_and_json(ureq::post(&server.url("/pokemon")).send_json(json!({
        "name": "Eevee",
        "data": {"hp": 55, "shiny": true, "nickname": "Say \"hi\""},
    })))?;
    assert_eq!(status, 200);

    let (_, eevee) = status_and_json(ureq::get(&server.url("/pokemon/Eevee")).call())?;
    assert_eq!(
        eevee,
        json!({"hp": 55, "shiny": "true", "nickname": "Say \"hi\""})
    );
    Ok(())
}

#[test]
fn post_without_name_or_data_is_400() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    for payload in [
        json!({"data": {"hp": 1}}),
        json!({"name": "Mew"}),
        json!({"name": "Mew", "data": "hp=1"}),
    ] {
        let (status, body) =
            status_and_json(ureq::post(&server.url("/pokemon")).send_json(payload))?;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["kind"], "Usage");
    }

    let (status, _) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .set("Content-Type", "application/json")
            .send_string("{not json"),
    )?;
    assert_eq!(status, 400);

    assert_eq!(std::fs::read_to_string(&file)?, SEED);
    Ok(())
}

#[test]
fn unreadable_table_is_500() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = temp.path().join("Pokemon.lua");
    std::fs::write(&file, "_G.Pokemon = { [\"Pikachu\"] = { hp = 35 },")?;
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(ureq::get(&server.url("/pokemon/Pikachu")).call())?;
    assert_eq!(status, 500);
    assert_eq!(body["error"]["kind"], "Parse");

    let (status, _) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .send_json(json!({"name": "Mew", "data": {"hp": 100}})),
    )?;
    assert_eq!(status, 500);
    Ok(())
}

#[test]
fn missing_table_file_is_500() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = temp.path().join("absent.lua");
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(ureq::get(&server.url("/pokemon/Pikachu")).call())?;
    assert_eq!(status, 500);
    assert_eq!(body["error"]["kind"], "Read");
    Ok(())
}

#[test]
fn concurrent_posts_all_persist() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;
    let url = server.url("/pokemon");

    let handles: Vec<_> = (0..8)
        .map(|idx| {
            let url = url.clone();
            std::thread::spawn(move || {
                ureq::post(&url)
                    .send_json(json!({"name": format!("Clone{idx}"), "data": {"hp": idx}}))
                    .map(|resp| resp.status())
                    .map_err(|err| err.to_string())
            })
        })
        .collect();
    for handle in handles {
        let status = handle.join().map_err(|_| "writer panicked")??;
        assert_eq!(status, 200);
    }

    let table = FileStore::new(&file).load()?;
    assert_eq!(table.len(), 10);
    for idx in 0..8 {
        assert!(table.entries().contains_key(&format!("Clone{idx}")));
    }
    Ok(())
}

#[test]
fn post_with_unstorable_text_is_400_and_file_stays_readable() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start(&file)?;

    let (status, body) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .send_json(json!({"name": "Porygon", "data": {"path": "C:\\"}})),
    )?;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["kind"], "Usage");
    assert_eq!(std::fs::read_to_string(&file)?, SEED);

    let (status, _) = status_and_json(ureq::get(&server.url("/pokemon/Pikachu")).call())?;
    assert_eq!(status, 200);
    Ok(())
}

#[test]
fn unsynchronized_write_mode_serves_reads_and_writes() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let file = seeded_file(temp.path())?;
    let server = TestServer::start_with_args(&file, &["--write-mode", "unsynchronized"])?;

    let (status, body) = status_and_json(
        ureq::post(&server.url("/pokemon"))
            .send_json(json!({"name": "Squirtle", "data": {"hp": 44}})),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "inserted");

    let (status, squirtle) =
        status_and_json(ureq::get(&server.url("/pokemon/Squirtle")).call())?;
    assert_eq!(status, 200);
    assert_eq!(squirtle, json!({"hp": 44}));

    let table = FileStore::new(&file).load()?;
    assert_eq!(table.len(), 3);
    Ok(())
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}
