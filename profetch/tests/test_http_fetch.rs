use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use profetch::domain::{FetchTask, MappingKey};
use profetch::fetch::Grabber;
use profetch::plugin::{ElfObjTool, Ui};
use profetch::symbolization::{SymbolizeMode, Symbolizer};
use profetch::{fetch_profiles, FetchEnv, Options, SourceConfig};
use profetch_common::{Location, Mapping, Profile, Sample, ValueType};

#[derive(Default)]
struct RecordingUi {
    errors: Mutex<Vec<String>>,
}

impl Ui for RecordingUi {
    fn print(&self, _: &str) {}

    fn print_err(&self, msg: &str) {
        self.errors.lock().unwrap().push(msg.to_string());
    }
}

fn server_profile() -> Profile {
    Profile {
        sample_type: vec![ValueType::new("samples", "count")],
        sample: vec![
            Sample { location: vec![1], value: vec![5], label: vec![] },
            Sample { location: vec![2], value: vec![2], label: vec![] },
        ],
        mapping: vec![Mapping {
            id: 1,
            start: 0x40_0000,
            limit: 0x50_0000,
            file: "/srv/bin/api-server".to_string(),
            build_id: "0123abcd".to_string(),
            ..Default::default()
        }],
        location: vec![
            Location { id: 1, mapping_id: 1, address: 0x40_1010, ..Default::default() },
            Location { id: 2, mapping_id: 1, address: 0x40_2020, ..Default::default() },
        ],
        period_type: Some(ValueType::new("cpu", "nanoseconds")),
        period: 10_000_000,
        ..Default::default()
    }
}

fn encoded(p: &Profile) -> Vec<u8> {
    let mut buf = Vec::new();
    p.write(&mut buf).unwrap();
    buf
}

/// Serve `app` on an ephemeral port from a background runtime.
fn spawn_server(app: Router) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    rx.recv().unwrap()
}

/// A pprof-style server. Records the `seconds` parameter of each profile
/// request and names every symbolz address it is asked about.
fn pprof_server(seen_seconds: Arc<Mutex<Vec<String>>>) -> SocketAddr {
    let body = encoded(&server_profile());
    let app = Router::new()
        .route(
            "/debug/pprof/profile",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let body = body.clone();
                let seen = Arc::clone(&seen_seconds);
                async move {
                    seen.lock().unwrap().push(params.get("seconds").cloned().unwrap_or_default());
                    body
                }
            }),
        )
        .route(
            "/debug/pprof/symbol",
            post(|req: String| async move {
                req.split('+')
                    .map(|addr| format!("{addr} handler_{}\n", addr.trim_start_matches("0x")))
                    .collect::<String>()
            }),
        )
        .route("/debug/pprof/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/debug/pprof/trace",
            get(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    [("X-Go-Pprof", "1"), ("Content-Type", "text/plain; charset=utf-8")],
                    "profile duration exceeds server's WriteTimeout",
                )
            }),
        );
    spawn_server(app)
}

fn config(sources: Vec<String>, symbolize: SymbolizeMode) -> SourceConfig {
    SourceConfig { sources, symbolize, ..Default::default() }
}

#[test]
fn test_fetch_bare_host_port_source() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let addr = pprof_server(Arc::clone(&seen));
    let save_dir = tempfile::tempdir().unwrap();
    let env = FetchEnv { tmp_dir: Some(save_dir.path().to_path_buf()), ..Default::default() };
    let ui = RecordingUi::default();
    let sym = Symbolizer::default();
    let options = Options { fetcher: None, obj: &ElfObjTool, ui: &ui, sym: &sym };

    let mut cfg = config(vec![format!("{addr}/debug/pprof/profile")], SymbolizeMode::None);
    cfg.duration = std::time::Duration::from_secs(1);
    let p = fetch_profiles(&cfg, &env, &options).unwrap();

    assert_eq!(p.sample.len(), 2);
    assert_eq!(seen.lock().unwrap().as_slice(), ["1"]);

    let saved: Vec<_> = std::fs::read_dir(save_dir.path()).unwrap().flatten().collect();
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved[0].file_name().to_string_lossy(),
        "pprof.api-server.samples.001.pb.gz"
    );
}

#[test]
fn test_remote_symbolization_uses_provenance() {
    let addr = pprof_server(Arc::default());
    let save_dir = tempfile::tempdir().unwrap();
    let env = FetchEnv { tmp_dir: Some(save_dir.path().to_path_buf()), ..Default::default() };
    let ui = RecordingUi::default();
    let sym = Symbolizer::default();
    let options = Options { fetcher: None, obj: &ElfObjTool, ui: &ui, sym: &sym };

    let cfg = config(vec![format!("http://{addr}/debug/pprof/profile")], SymbolizeMode::Remote);
    let p = fetch_profiles(&cfg, &env, &options).unwrap();

    assert!(p.mapping[0].has_functions);
    let mut names: Vec<&str> = p
        .location
        .iter()
        .flat_map(|l| &l.line)
        .filter_map(|line| p.function(line.function_id))
        .map(|f| f.name.as_str())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["handler_401010", "handler_402020"]);
}

#[test]
fn test_http_error_is_reported_per_source() {
    let addr = pprof_server(Arc::default());
    let save_dir = tempfile::tempdir().unwrap();
    let env = FetchEnv { tmp_dir: Some(save_dir.path().to_path_buf()), ..Default::default() };
    let ui = RecordingUi::default();
    let sym = Symbolizer::default();
    let options = Options { fetcher: None, obj: &ElfObjTool, ui: &ui, sym: &sym };

    let good = format!("http://{addr}/debug/pprof/profile");
    let bad = format!("http://{addr}/debug/pprof/missing");
    let p = fetch_profiles(&config(vec![good, bad.clone()], SymbolizeMode::None), &env, &options)
        .unwrap();
    assert_eq!(p.sample.len(), 2);

    let errors = ui.errors.lock().unwrap();
    assert!(errors.contains(&format!("{bad}: server response: 404 Not Found")), "{errors:?}");
    assert!(errors.contains(&"fetched 1 profiles out of 2".to_string()));
}

#[test]
fn test_pprof_error_body_is_reported() {
    let addr = pprof_server(Arc::default());
    let ui = RecordingUi::default();
    let sym = Symbolizer::default();
    let options = Options { fetcher: None, obj: &ElfObjTool, ui: &ui, sym: &sym };

    let bad = format!("http://{addr}/debug/pprof/trace");
    let cfg = config(vec![bad.clone()], SymbolizeMode::None);
    let err = fetch_profiles(&cfg, &FetchEnv::default(), &options).unwrap_err();
    assert_eq!(err.to_string(), "failed to fetch any profiles");

    let errors = ui.errors.lock().unwrap();
    let expected = format!(
        "{bad}: server response: 400 Bad Request - profile duration exceeds server's WriteTimeout"
    );
    assert!(errors.contains(&expected), "{errors:?}");
}

#[test]
fn test_every_origin_is_recorded() {
    let a = pprof_server(Arc::default());
    let b = pprof_server(Arc::default());
    let cfg = SourceConfig::default();
    let ui = RecordingUi::default();
    let grabber = Grabber::new(&cfg, &FetchEnv::default(), None, &ElfObjTool, &ui);

    let tasks = [
        FetchTask::numerator(&format!("http://{a}/debug/pprof/profile")),
        FetchTask::numerator(&format!("http://{b}/debug/pprof/profile")),
    ];
    let grab = grabber.chunked_grab(&tasks).unwrap().unwrap();

    assert_eq!(grab.count, 2);
    assert!(grab.remote);
    assert_eq!(grab.profile.sample.iter().map(|s| s.value[0]).sum::<i64>(), 14);
    let origins = grab.sources.get(&MappingKey::BuildId("0123abcd".to_string())).unwrap();
    let urls: Vec<&str> = origins.iter().map(|s| s.source.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            format!("http://{a}/debug/pprof/profile"),
            format!("http://{b}/debug/pprof/profile")
        ]
    );
    assert!(origins.iter().all(|s| s.start == 0x40_0000));
}
