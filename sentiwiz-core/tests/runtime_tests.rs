// Integration tests for model downloads against a local pull fixture
//
// The fixture is a bare TCP server speaking just enough HTTP to carry
// the NDJSON pull stream, which lets the tests control pacing: a
// response can be split mid-stream, stalled, or poisoned with an error
// line.

use sentiwiz_common::events::{DownloadState, EventBus, WizardEvent};
use sentiwiz_core::services::ollama::OllamaClient;
use sentiwiz_core::services::runtime::RuntimeManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Consume the request up to the end of its headers; the body is small
/// enough that leaving it unread never blocks the client
async fn read_request(stream: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
}

async fn write_head(stream: &mut TcpStream, body_len: usize) {
    let head = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: {}\r\n\r\n",
        body_len
    );
    stream.write_all(head.as_bytes()).await.unwrap();
}

fn manager_for(url: String) -> (Arc<RuntimeManager>, EventBus) {
    let bus = EventBus::new(256);
    let manager = Arc::new(RuntimeManager::with_client(
        OllamaClient::with_base_url(url),
        bus.clone(),
    ));
    (manager, bus)
}

#[tokio::test]
async fn pull_progress_updates_published_status_mid_stream() {
    let (listener, url) = bind().await;
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    // Send one progress line, hold the success token until released
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        let first: &[u8] = b"{\"status\":\"pulling manifest\"}\n";
        let second: &[u8] = b"{\"status\":\"success\"}\n";
        write_head(&mut stream, first.len() + second.len()).await;
        stream.write_all(first).await.unwrap();
        stream.flush().await.unwrap();
        release_rx.await.unwrap();
        stream.write_all(second).await.unwrap();
    });

    let (manager, _bus) = manager_for(url);
    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.download_model("m").await })
    };

    // A snapshot poller must see the stream's status, not a frozen
    // "Downloading model m..." from the start of the pull
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.snapshot().status_message != "pulling manifest" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "published status never followed the stream, stuck at {:?}",
            manager.snapshot().status_message
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    release_tx.send(()).unwrap();
    assert_eq!(task.await.unwrap(), DownloadState::Succeeded);

    let record = manager.current_download().unwrap();
    assert_eq!(record.model_name, "m");
    assert_eq!(record.state, DownloadState::Succeeded);
    assert_eq!(manager.snapshot().status_message, "Model m downloaded");
}

#[tokio::test]
async fn pull_error_line_fails_the_download() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        let body: &[u8] = b"{\"error\":\"model not found\"}\n";
        write_head(&mut stream, body.len()).await;
        stream.write_all(body).await.unwrap();
    });

    let (manager, _bus) = manager_for(url);
    assert_eq!(
        manager.download_model("missing").await,
        DownloadState::Failed
    );
    assert_eq!(
        manager.current_download().unwrap().state,
        DownloadState::Failed
    );
    assert_eq!(
        manager.snapshot().status_message,
        "Download of missing failed"
    );
}

#[tokio::test]
async fn pull_rejected_with_http_error_fails_the_download() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let (manager, _bus) = manager_for(url);
    assert_eq!(manager.download_model("m").await, DownloadState::Failed);
}

#[tokio::test]
async fn cancel_tears_down_the_stream_and_leaves_models_alone() {
    let (listener, url) = bind().await;

    // One progress line, then the stream stalls indefinitely
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        write_head(&mut stream, 4096).await;
        stream
            .write_all(b"{\"status\":\"pulling manifest\",\"completed\":1,\"total\":100}\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let (manager, bus) = manager_for(url);
    let mut rx = bus.subscribe();

    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.download_model("m").await })
    };

    // Cancel only once the stream is known to be flowing
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no progress before cancel")
            .unwrap();
        if matches!(event, WizardEvent::ModelDownloadProgress { .. }) {
            break;
        }
    }
    manager.cancel_download();

    assert_eq!(task.await.unwrap(), DownloadState::Cancelled);
    assert_eq!(
        manager.current_download().unwrap().state,
        DownloadState::Cancelled
    );
    // A cancelled pull never touches the model list
    assert!(manager.snapshot().available_models.is_empty());
    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            WizardEvent::ModelsRefreshed { .. } => panic!("cancelled pull refreshed models"),
            WizardEvent::ModelDownloadFinished { state, .. } => finished = Some(state),
            _ => {}
        }
    }
    assert_eq!(finished, Some(DownloadState::Cancelled));
}

#[tokio::test]
async fn new_download_supersedes_the_previous_one() {
    let (listener, url) = bind().await;

    // First connection stalls after one line; the second succeeds
    tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        tokio::spawn(async move {
            read_request(&mut first).await;
            write_head(&mut first, 4096).await;
            first
                .write_all(b"{\"status\":\"pulling a\"}\n")
                .await
                .unwrap();
            first.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let (mut second, _) = listener.accept().await.unwrap();
        read_request(&mut second).await;
        let body: &[u8] = b"{\"status\":\"success\"}\n";
        write_head(&mut second, body.len()).await;
        second.write_all(body).await.unwrap();
    });

    let (manager, bus) = manager_for(url);
    let mut rx = bus.subscribe();

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.download_model("a").await })
    };
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first download never reported progress")
            .unwrap();
        if matches!(event, WizardEvent::ModelDownloadProgress { ref model, .. } if model == "a") {
            break;
        }
    }

    let second = manager.download_model("b").await;

    assert_eq!(second, DownloadState::Succeeded);
    assert_eq!(first.await.unwrap(), DownloadState::Cancelled);

    // The superseded download left no mark on the published record
    let record = manager.current_download().unwrap();
    assert_eq!(record.model_name, "b");
    assert_eq!(record.state, DownloadState::Succeeded);
    assert_eq!(manager.snapshot().status_message, "Model b downloaded");
}
