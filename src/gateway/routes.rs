use std::{convert::Infallible, time::Instant};

use futures_util::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use warp::{Buf, Filter, Rejection, Reply};

use super::{
    handlers,
    rejection::{handle_rejection, BodyRejection},
};
use crate::app::AppState;
use crate::jobs::Operation;

const MAX_BODY_BYTES: usize = 256 * 1024;

/// Build the complete route tree, rejections already recovered.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let ping = started()
        .and(warp::path("ping"))
        .and(warp::path::end())
        .and(warp::get())
        .and_then(handlers::ping);

    let download_weights = warp::path("download_gdrive_pths")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::download_weights);

    let download_dataset = warp::path("download_extract_dataset")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::download_dataset);

    let remove_dataset = warp::path("remove_dataset")
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handlers::remove_dataset);

    let remove_subfolder = warp::path("remove_dataset_subfolder")
        .and(warp::path::end())
        .and(warp::delete())
        .and(warp::query::<handlers::SubfolderQuery>())
        .and(with_state(state.clone()))
        .and_then(handlers::remove_dataset_subfolder);

    let list_weights = warp::path("list_weights")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_weights);

    let list_dataset = warp::path("list_dataset")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_dataset);

    // One route for every compute operation; unknown names fail to parse and 404.
    let job = warp::path::param::<Operation>()
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state))
        .and_then(handlers::run_job);

    ping.or(download_weights)
        .or(download_dataset)
        .or(remove_dataset)
        .or(remove_subfolder)
        .or(list_weights)
        .or(list_dataset)
        .or(job)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

// =============================================================================
// Filters
// =============================================================================

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn started() -> impl Filter<Extract = (Instant,), Error = Infallible> + Clone {
    warp::any().map(Instant::now)
}

/// JSON body capped at `MAX_BODY_BYTES`. The cap is enforced while reading, so
/// chunked requests without a `Content-Length` are accepted too.
fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::header::optional::<String>("content-type")
        .and(warp::body::stream())
        .and_then(|content_type: Option<String>, body| {
            read_json::<T, _, _>(content_type, body)
        })
}

async fn read_json<T, S, B>(content_type: Option<String>, body: S) -> Result<T, Rejection>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if let Some(content_type) = content_type {
        if !content_type.to_ascii_lowercase().contains("json") {
            return Err(warp::reject::custom(BodyRejection::NotJson(content_type)));
        }
    }

    futures_util::pin_mut!(body);
    let mut bytes = Vec::new();
    while let Some(mut chunk) = body
        .try_next()
        .await
        .map_err(|err| warp::reject::custom(BodyRejection::Unreadable(err.to_string())))?
    {
        if bytes.len() + chunk.remaining() > MAX_BODY_BYTES {
            return Err(warp::reject::custom(BodyRejection::TooLarge(MAX_BODY_BYTES)));
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let read = part.len();
            bytes.extend_from_slice(part);
            chunk.advance(read);
        }
    }

    serde_json::from_slice(&bytes)
        .map_err(|err| warp::reject::custom(BodyRejection::Malformed(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{DriveSettings, GatewaySettings, LockPolicy, ToolSettings};
    use crate::gateway::handlers::{JobResponse, PingResponse, StatusResponse};
    use serde_json::json;
    use std::fs;
    use warp::http::StatusCode;

    fn state_in(root: &std::path::Path) -> AppState {
        AppState::new(GatewaySettings {
            weights_dir: root.join("weights"),
            dataset_dir: root.join("datasets"),
            staging_dir: root.join("staging"),
            lock_policy: LockPolicy::Wait,
            ..GatewaySettings::default()
        })
    }

    #[tokio::test]
    async fn ping_reports_pong_and_latency() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let resp = warp::test::request().path("/ping").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: PingResponse = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.ping, "pong");
        assert!(body.latency >= 0.0);
    }

    #[tokio::test]
    async fn unknown_operations_are_not_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let resp = warp::test::request()
            .method("POST")
            .path("/format_disk")
            .json(&json!({}))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let resp = warp::test::request()
            .method("GET")
            .path("/infer")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn positional_bodies_are_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let resp = warp::test::request()
            .method("POST")
            .path("/infer")
            .json(&json!(["--pth_path", "a.pth"]))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["code"], "invalid_input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn jobs_return_captured_streams_even_on_failure() {
        let state = AppState::new(GatewaySettings {
            tool: ToolSettings {
                program: "/bin/sh".into(),
                args: vec![
                    "-c".into(),
                    r#"echo "$@"; echo "no such model" >&2; exit 1"#.into(),
                    "rvc".into(),
                ],
                ..ToolSettings::default()
            },
            ..GatewaySettings::default()
        });
        let routes = routes(state);

        let resp = warp::test::request()
            .method("POST")
            .path("/preprocess")
            .json(&json!({"sample_rate": 40000, "path": "/data/x"}))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: JobResponse = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.output, "preprocess --sample_rate 40000 --path /data/x\n");
        assert_eq!(body.error, "no such model\n");
        assert_eq!(body.exit_code, Some(1));
    }

    #[tokio::test]
    async fn chunked_bodies_need_no_content_length() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let (addr, server) =
            warp::serve(routes(state_in(dir.path()))).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = "POST /download_gdrive_pths HTTP/1.1\r\n\
                       Host: localhost\r\n\
                       Content-Type: application/json\r\n\
                       Transfer-Encoding: chunked\r\n\
                       Connection: close\r\n\r\n\
                       4\r\n{\"id\r\n6\r\n\": \"\"}\r\n0\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 400"), "{response}");
        assert!(response.contains("id is required"), "{response}");
    }

    #[tokio::test]
    async fn oversized_and_non_json_bodies_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let padding = "x".repeat(MAX_BODY_BYTES);
        let resp = warp::test::request()
            .method("POST")
            .path("/infer")
            .json(&json!({ "padding": padding }))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = warp::test::request()
            .method("POST")
            .path("/infer")
            .header("content-type", "text/plain")
            .body("pitch=2")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let resp = warp::test::request()
            .method("POST")
            .path("/infer")
            .header("content-type", "application/json")
            .body("{ not json")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_without_id_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        for path in ["/download_gdrive_pths", "/download_extract_dataset"] {
            let resp = warp::test::request()
                .method("POST")
                .path(path)
                .json(&json!({}))
                .reply(&routes)
                .await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path}");
        }
    }

    #[tokio::test]
    async fn dataset_subfolder_must_stay_inside_the_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let resp = warp::test::request()
            .method("POST")
            .path("/download_extract_dataset")
            .json(&json!({"id": "abc", "subfolder_name": "../weights"}))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn concurrent_removals_of_a_missing_dataset_both_404() {
        let dir = tempfile::tempdir().unwrap();
        let routes = routes(state_in(dir.path()));

        let first = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset")
            .reply(&routes);
        let second = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset")
            .reply(&routes);
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.status(), StatusCode::NOT_FOUND);
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn removes_dataset_and_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let dataset_dir = state.settings().dataset_dir.clone();
        fs::create_dir_all(dataset_dir.join("alice")).unwrap();
        fs::create_dir_all(dataset_dir.join("bob")).unwrap();
        let routes = routes(state);

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset_subfolder?subfolder_name=alice")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: StatusResponse = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.status, "success");
        assert!(!dataset_dir.join("alice").exists());
        assert!(dataset_dir.join("bob").exists());

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset_subfolder?subfolder_name=alice")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset_subfolder")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!dataset_dir.exists());
    }

    /// Accepts connections and holds them silently for `stall` before hanging up.
    fn stalled_drive(stall: std::time::Duration) -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                std::thread::spawn(move || {
                    std::thread::sleep(stall);
                    drop(stream);
                });
            }
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_ingest_keeps_its_directory_locked() {
        let dir = tempfile::tempdir().unwrap();
        let drive = stalled_drive(std::time::Duration::from_millis(1500));
        let state = AppState::new(GatewaySettings {
            weights_dir: dir.path().join("weights"),
            dataset_dir: dir.path().join("datasets"),
            staging_dir: dir.path().join("staging"),
            lock_policy: LockPolicy::Reject,
            drive: DriveSettings {
                base_url: format!("http://{drive}/uc"),
                timeout_secs: 10,
                ..DriveSettings::default()
            },
            ..GatewaySettings::default()
        });
        let dataset_dir = state.settings().dataset_dir.clone();
        let routes = routes(state.clone());

        let ingest = warp::test::request()
            .method("POST")
            .path("/download_extract_dataset")
            .json(&json!({"id": "slow"}))
            .reply(&routes);
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(300), ingest).await;
        assert!(abandoned.is_err());

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // released once the blocking download gives up
        let mut released = false;
        for _ in 0..100 {
            if state.locks().acquire(&dataset_dir).await.is_ok() {
                released = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(released);
    }

    #[tokio::test]
    async fn busy_directories_are_rejected_under_reject_policy() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(GatewaySettings {
            dataset_dir: dir.path().join("datasets"),
            lock_policy: LockPolicy::Reject,
            ..GatewaySettings::default()
        });
        let dataset_dir = state.settings().dataset_dir.clone();
        let _held = state.locks().acquire(&dataset_dir).await.unwrap();
        let routes = routes(state.clone());

        let resp = warp::test::request()
            .method("DELETE")
            .path("/remove_dataset")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
