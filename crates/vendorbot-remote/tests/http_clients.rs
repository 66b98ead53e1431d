//! REST clients against a canned local HTTP server.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use vendorbot_ci::{CiJobResult, CiProvider};
use vendorbot_core::{BugTracker, NewTicket, ProviderError, Transient};
use vendorbot_remote::{BugzillaClient, BugzillaConfig, TreeherderClient, TreeherderConfig};

/// Read one HTTP/1.1 request, headers and body.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Answer one connection per canned `(status, body)` and return the requests.
async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);
            let reply = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        requests
    });
    (base, handle)
}

fn bugzilla(base: &str) -> BugzillaClient {
    BugzillaClient::new(BugzillaConfig {
        url: format!("{base}/rest"),
        api_key: "test-key".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn treeherder(base: &str) -> TreeherderClient {
    TreeherderClient::new(
        TreeherderConfig {
            url: base.to_string(),
            repo: "try".to_string(),
            taskcluster_root_url: "https://tc.test".to_string(),
            mach: "./mach".to_string(),
            taskcluster: "taskcluster".to_string(),
            timeout_secs: 5,
        },
        std::env::temp_dir(),
    )
    .unwrap()
}

#[tokio::test]
async fn filing_posts_the_ticket_with_the_api_key() {
    let (base, server) = serve(vec![(200, r#"{"id":1234}"#)]).await;
    let ticket = NewTicket {
        product: "Core".into(),
        component: "Audio/Video".into(),
        summary: "Update opus to new version abc".into(),
        description: "commit list".into(),
        cc: vec![],
        needinfo: vec![],
        depends_on: Some(99),
        blocks: None,
    };

    let id = bugzilla(&base).file(&ticket).await.unwrap();
    assert_eq!(id, 1234);

    let requests = server.await.unwrap();
    let request = &requests[0];
    assert!(request.starts_with("POST /rest/bug "));
    assert!(request.to_ascii_lowercase().contains("x-bugzilla-api-key: test-key"));
    assert!(request.contains(r#""product":"Core""#));
    assert!(request.contains(r#""depends_on":[99]"#));
}

#[tokio::test]
async fn find_open_keeps_only_open_bugs() {
    let (base, server) = serve(vec![(
        200,
        r#"{"bugs":[{"id":1,"is_open":true},{"id":2,"is_open":false},{"id":3,"is_open":true}]}"#,
    )])
    .await;

    let open = bugzilla(&base).find_open(&[1, 2, 3]).await.unwrap();
    assert_eq!(open, vec![1, 3]);
    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("GET /rest/bug?id=1%2C2%2C3"));
}

#[tokio::test]
async fn comment_with_needinfo_updates_the_bug() {
    let (base, server) = serve(vec![(201, r#"{"id":5}"#), (200, r#"{"bugs":[]}"#)]).await;
    bugzilla(&base)
        .comment(77, "please look", Some("m@example.com"), None)
        .await
        .unwrap();

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /rest/bug/77/comment "));
    assert!(requests[1].starts_with("PUT /rest/bug/77 "));
    assert!(requests[1].contains("needinfo"));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let (base, _server) = serve(vec![(503, r#"{"error":true,"message":"maintenance"}"#)]).await;
    let err = bugzilla(&base).find_open(&[1]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Http { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn unknown_push_has_no_results_yet() {
    let (base, server) = serve(vec![(200, r#"{"results":[]}"#)]).await;
    let jobs = treeherder(&base).get_job_results("abc123").await.unwrap();
    assert!(jobs.is_empty());
    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("GET /api/project/try/push/?revision=abc123"));
}

#[tokio::test]
async fn job_results_follow_the_push() {
    let (base, server) = serve(vec![
        (200, r#"{"results":[{"id":42}]}"#),
        (
            200,
            r#"{"job_property_names":["job_type_name","task_id","retry_id","state","result","failure_classification_id"],
               "results":[["build-linux64/opt","T1",0,"completed","busted",1]]}"#,
        ),
    ])
    .await;

    let jobs = treeherder(&base).get_job_results("abc123").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].result, CiJobResult::Busted);
    let requests = server.await.unwrap();
    assert!(requests[1].contains("push_id=42"));
}

#[tokio::test]
async fn classifications_by_id() {
    let (base, _server) = serve(vec![(
        200,
        r#"[{"id":1,"name":"not classified"},{"id":4,"name":"intermittent"}]"#,
    )])
    .await;
    let names = treeherder(&base).failure_classifications().await.unwrap();
    assert_eq!(names.get(&4).map(String::as_str), Some("intermittent"));
}

#[test]
fn push_url_points_at_the_try_repo() {
    let client = treeherder("https://treeherder.test/");
    assert_eq!(
        client.push_url("abc"),
        "https://treeherder.test/jobs?repo=try&revision=abc"
    );
}
