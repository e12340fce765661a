//! Adapter tests against local mock sites.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use paperspider_core::{
    ArtifactKind, ArtifactPayload, ArtifactStatus, FetchManager, HttpSettings, IclrSource,
    IcmlSource, NeuripsSource, SourceAdapter, SourceError, Throttle, sync,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn settings() -> HttpSettings {
    HttpSettings::with_timeouts(2, 5)
}

async fn serve(server: &MockServer, at: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(response)
        .mount(server)
        .await;
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

/// Responder that notes when each request reached the server.
#[derive(Clone)]
struct Timed {
    arrivals: Arc<Mutex<Vec<Instant>>>,
    response: ResponseTemplate,
}

impl Respond for Timed {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        self.response.clone()
    }
}

// ==================== NeurIPS ====================

const NEURIPS_INDEX: &str = r#"
    <html><body><ul>
      <li><a href="/paper/2023/hash/0a1b-Abstract-Conference.html">Graph Nets</a>
          <i>Alice Smith, Bob Jones</i></li>
      <li><a href="/paper/2023/hash/9f9f-Abstract-Conference.html">Tree Models</a>
          <i>Carol White</i></li>
    </ul></body></html>"#;

const NEURIPS_DETAIL: &str = r#"
    <html><body>
      <h4>Abstract</h4><p>We propose graph networks.</p>
      <a href="/paper/2023/file/0a1b-Bibtex.bib">Bibtex</a>
      <a href="/paper/2023/file/0a1b-Paper-Conference.pdf">Paper</a>
    </body></html>"#;

async fn neurips_site() -> MockServer {
    let server = MockServer::start().await;
    serve(&server, "/paper/2023", html(NEURIPS_INDEX)).await;
    serve(&server, "/paper/2023/hash/0a1b-Abstract-Conference.html", html(NEURIPS_DETAIL)).await;
    serve(
        &server,
        "/paper/2023/file/0a1b-Paper-Conference.pdf",
        ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5 graph".to_vec()),
    )
    .await;
    serve(
        &server,
        "/paper/2023/file/0a1b-Bibtex.bib",
        ResponseTemplate::new(200).set_body_string("@inproceedings{smith2023graph,\n title={Graph Nets}\n}\n"),
    )
    .await;
    server
}

fn neurips(server: &MockServer) -> NeuripsSource {
    let uri = server.uri();
    NeuripsSource::with_base_urls(&settings(), [format!("{uri}/mirror"), format!("{uri}/paper")])
        .unwrap()
}

#[tokio::test]
async fn test_neurips_lists_from_second_mirror() {
    let server = neurips_site().await;
    let source = neurips(&server);

    let papers = source.list_papers(2023).await.unwrap();

    assert_eq!(papers.len(), 2);
    assert_eq!(papers[0].key.source_id, "0a1b");
    assert_eq!(papers[0].title, "Graph Nets");
    assert_eq!(papers[0].authors, vec!["Alice Smith", "Bob Jones"]);
    assert_eq!(papers[1].authors, vec!["Carol White"]);
    for paper in &papers {
        for kind in ArtifactKind::ALL {
            assert_eq!(paper.status(kind), ArtifactStatus::Missing);
        }
    }
}

#[tokio::test]
async fn test_neurips_artifacts_follow_detail_links() {
    let server = neurips_site().await;
    let source = neurips(&server);
    let paper = source.list_papers(2023).await.unwrap().remove(0);

    let gate = Throttle::disabled();

    let abstract_text =
        source.fetch_artifact(&paper, ArtifactKind::Abstract, &gate).await.unwrap();
    let pdf = source.fetch_pdf_bytes(&paper, &gate).await.unwrap();
    let bib = source.fetch_bibtex(&paper, &gate).await.unwrap();

    assert_eq!(
        abstract_text,
        ArtifactPayload::Abstract("We propose graph networks.".to_string())
    );
    assert_eq!(pdf, b"%PDF-1.5 graph");
    assert!(bib.starts_with("@inproceedings{smith2023graph"));
}

#[tokio::test]
async fn test_neurips_missing_detail_page_is_not_found() {
    let server = neurips_site().await;
    let source = neurips(&server);
    let papers = source.list_papers(2023).await.unwrap();

    let err = source.fetch_abstract(&papers[1], &Throttle::disabled()).await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_neurips_year_absent_everywhere_is_empty_year() {
    let server = MockServer::start().await;
    let source = neurips(&server);

    let err = source.list_papers(2031).await.unwrap_err();

    assert!(matches!(err, SourceError::EmptyYear { year: 2031, .. }));
}

#[tokio::test]
async fn test_neurips_server_error_is_transient() {
    let server = MockServer::start().await;
    serve(&server, "/paper/2023", ResponseTemplate::new(503)).await;
    let source = neurips(&server);

    let err = source.list_papers(2023).await.unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn test_neurips_sync_then_fetch_pdfs() {
    let server = neurips_site().await;
    let source: Arc<dyn SourceAdapter> = Arc::new(neurips(&server));
    let dir = tempfile::TempDir::new().unwrap();
    let dataset = paperspider_core::Dataset::new(dir.path(), "neurips", 2023).unwrap();
    let store = paperspider_core::Store::open(dataset, paperspider_core::DatabaseOptions::default())
        .await
        .unwrap();

    let report = sync(source.as_ref(), &store).await.unwrap();
    assert_eq!(report.upsert.inserted, 2);

    let manager = FetchManager::new(store.clone(), Arc::clone(&source), 2).unwrap();
    let summary = manager
        .start_batch(
            store.records().await.unwrap(),
            ArtifactKind::Pdf,
            Duration::from_millis(10),
            |_| {},
            |_| {},
        )
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    let fetched = store.get(&store.dataset().key("0a1b")).await.unwrap().unwrap();
    let path = fetched.pdf_path.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.5 graph");
    let failed = store.get(&store.dataset().key("9f9f")).await.unwrap().unwrap();
    assert_eq!(failed.pdf_status, ArtifactStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_neurips_detail_and_file_requests_share_the_interval() {
    const HASHES: [&str; 3] = ["aa01", "aa02", "aa03"];
    let interval = Duration::from_millis(150);

    let server = MockServer::start().await;
    let index: String = HASHES
        .iter()
        .map(|hash| {
            format!(r#"<li><a href="/paper/2023/hash/{hash}-Abstract-Conference.html">Paper {hash}</a></li>"#)
        })
        .collect();
    serve(&server, "/paper/2023", html(&format!("<ul>{index}</ul>"))).await;

    let arrivals: Arc<Mutex<Vec<Instant>>> = Arc::default();
    for hash in HASHES {
        let detail = format!(
            r#"<h4>Abstract</h4><p>Text.</p><a href="/paper/2023/file/{hash}-Paper-Conference.pdf">Paper</a>"#
        );
        Mock::given(method("GET"))
            .and(path(format!("/paper/2023/hash/{hash}-Abstract-Conference.html")))
            .respond_with(Timed {
                arrivals: Arc::clone(&arrivals),
                response: html(&detail),
            })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/paper/2023/file/{hash}-Paper-Conference.pdf")))
            .respond_with(Timed {
                arrivals: Arc::clone(&arrivals),
                response: ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5".to_vec()),
            })
            .mount(&server)
            .await;
    }

    let source: Arc<dyn SourceAdapter> = Arc::new(neurips(&server));
    let dir = tempfile::TempDir::new().unwrap();
    let dataset = paperspider_core::Dataset::new(dir.path(), "neurips", 2023).unwrap();
    let store = paperspider_core::Store::open(dataset, paperspider_core::DatabaseOptions::default())
        .await
        .unwrap();
    sync(source.as_ref(), &store).await.unwrap();

    let manager = FetchManager::new(store.clone(), source, 1).unwrap();
    let summary = manager
        .start_batch(store.records().await.unwrap(), ArtifactKind::Pdf, interval, |_| {}, |_| {})
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.completed, 3);

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 6);
    let tolerance = Duration::from_millis(15);
    for pair in arrivals.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap + tolerance >= interval, "requests arrived {gap:?} apart");
    }
}

// ==================== ICML ====================

const PMLR_INDEX: &str = r#"
    <ul>
      <li><a href="v200/">Volume 200</a> Proceedings of CoLLAs 2023</li>
      <li><a href="v202/">Volume 202</a> International Conference on Machine Learning, 23-29 July 2023</li>
    </ul>"#;

const PMLR_VOLUME: &str = r#"
    <div class="paper">
      <p class="title">Scaling Laws for Graphs</p>
      <p class="authors">Alice Smith, Bob Jones</p>
      <p class="links">
        [<a href="smith23a.html">abs</a>]
        [<a href="smith23a/smith23a.pdf">Download PDF</a>]
      </p>
    </div>"#;

const PMLR_DETAIL: &str = r#"
    <h1>Scaling Laws for Graphs</h1>
    <div id="abstract" class="abstract">We study scaling.</div>
    <pre><code>@InProceedings{pmlr-v202-smith23a,
  title = {Scaling Laws for Graphs}
}</code></pre>"#;

async fn pmlr_site() -> MockServer {
    let server = MockServer::start().await;
    serve(&server, "/pmlr/", html(PMLR_INDEX)).await;
    serve(&server, "/pmlr/v202/", html(PMLR_VOLUME)).await;
    serve(&server, "/pmlr/v202/smith23a.html", html(PMLR_DETAIL)).await;
    server
}

#[tokio::test]
async fn test_icml_locates_volume_and_parses_papers() {
    let server = pmlr_site().await;
    let source = IcmlSource::with_index_url(&settings(), format!("{}/pmlr", server.uri())).unwrap();

    let papers = source.list_papers(2023).await.unwrap();

    assert_eq!(papers.len(), 1);
    let paper = &papers[0];
    assert_eq!(paper.key.source_id, "smith23a");
    assert_eq!(paper.authors, vec!["Alice Smith", "Bob Jones"]);
    assert_eq!(
        paper.pdf_url.as_deref(),
        Some(format!("{}/pmlr/v202/smith23a/smith23a.pdf", server.uri()).as_str())
    );

    let gate = Throttle::disabled();
    assert_eq!(source.fetch_abstract(paper, &gate).await.unwrap(), "We study scaling.");
    let bib = source.fetch_bibtex(paper, &gate).await.unwrap();
    assert!(bib.starts_with("@InProceedings{pmlr-v202-smith23a"));
}

#[tokio::test]
async fn test_icml_year_without_volume_is_empty_year() {
    let server = pmlr_site().await;
    let source = IcmlSource::with_index_url(&settings(), format!("{}/pmlr/", server.uri())).unwrap();

    let err = source.list_papers(2030).await.unwrap_err();

    assert!(matches!(err, SourceError::EmptyYear { .. }));
}

#[tokio::test]
async fn test_icml_missing_index_is_unavailable() {
    let server = MockServer::start().await;
    let source = IcmlSource::with_index_url(&settings(), format!("{}/pmlr/", server.uri())).unwrap();

    let err = source.list_papers(2023).await.unwrap_err();

    assert!(err.is_transient());
}

// ==================== ICLR ====================

fn notes_body() -> serde_json::Value {
    serde_json::json!({
        "notes": [
            {
                "id": "n1",
                "forum": "n1",
                "content": {
                    "title": {"value": "Graph Attention Networks"},
                    "authors": {"value": ["Alice Smith", "Bob Jones"]},
                    "keywords": {"value": ["graphs", "attention"]},
                    "venue": {"value": "ICLR 2024 Conference Poster"},
                    "pdf": {"value": "/pdf/abc.pdf"}
                }
            },
            {
                "id": "n2",
                "forum": "n2",
                "content": {
                    "title": {"value": "Rejected Idea"},
                    "venue": {"value": "Submitted to ICLR 2024"}
                }
            }
        ]
    })
}

#[tokio::test]
async fn test_iclr_prefers_accepted_notes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .and(query_param("invitation", "ICLR.cc/2024/Conference/-/Blind_Submission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(notes_body()))
        .mount(&server)
        .await;
    let source =
        IclrSource::with_endpoints(&settings(), [server.uri()], server.uri()).unwrap();

    let papers = source.list_papers(2024).await.unwrap();

    assert_eq!(papers.len(), 1);
    let paper = &papers[0];
    assert_eq!(paper.key.source_id, "n1");
    assert_eq!(paper.title, "Graph Attention Networks");
    assert!(paper.keywords.contains("attention"));
    assert_eq!(
        paper.detail_url.as_deref(),
        Some(format!("{}/forum?id=n1", server.uri()).as_str())
    );
    assert_eq!(
        paper.pdf_url.as_deref(),
        Some(format!("{}/pdf/abc.pdf", server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_iclr_falls_back_to_venue_queries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .and(query_param("content.venue", "ICLR 2024 Conference"))
        .respond_with(ResponseTemplate::new(200).set_body_json(notes_body()))
        .mount(&server)
        .await;
    let source =
        IclrSource::with_endpoints(&settings(), [server.uri()], server.uri()).unwrap();

    let papers = source.list_papers(2024).await.unwrap();

    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].key.source_id, "n1");
}

#[tokio::test]
async fn test_iclr_abstract_and_bibtex() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .and(query_param("forum", "n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "notes": [{"id": "n1", "content": {"abstract": {"value": "  Attention over graphs. "}}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/citation"))
        .and(query_param("id", "n1"))
        .and(query_param("format", "bibtex"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("@inproceedings{velickovic2018,\n title={GAT}\n}"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf"))
        .and(query_param("id", "n1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
        .mount(&server)
        .await;
    let source =
        IclrSource::with_endpoints(&settings(), [server.uri()], server.uri()).unwrap();
    let paper = paperspider_core::PaperRecord::new(
        paperspider_core::PaperKey::new("iclr", 2024, "n1"),
        "Graph Attention Networks",
    );

    let gate = Throttle::disabled();

    assert_eq!(source.fetch_abstract(&paper, &gate).await.unwrap(), "Attention over graphs.");
    assert!(source.fetch_bibtex(&paper, &gate).await.unwrap().starts_with("@inproceedings{velickovic2018"));
    assert_eq!(source.fetch_pdf_bytes(&paper, &gate).await.unwrap(), b"%PDF-1.4");

    let missing = paperspider_core::PaperRecord::new(
        paperspider_core::PaperKey::new("iclr", 2024, "n9"),
        "Unknown",
    );
    assert!(source.fetch_abstract(&missing, &gate).await.unwrap_err().is_not_found());
    assert!(source.fetch_bibtex(&missing, &gate).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_iclr_no_submissions_is_empty_year() {
    let server = MockServer::start().await;
    let source =
        IclrSource::with_endpoints(&settings(), [server.uri()], server.uri()).unwrap();

    let err = source.list_papers(2031).await.unwrap_err();

    assert!(matches!(err, SourceError::EmptyYear { year: 2031, .. }));
}

#[tokio::test]
async fn test_iclr_api_outage_is_transient() {
    let server = MockServer::start().await;
    serve(&server, "/notes", ResponseTemplate::new(503)).await;
    let source =
        IclrSource::with_endpoints(&settings(), [server.uri()], server.uri()).unwrap();

    let err = source.list_papers(2024).await.unwrap_err();

    assert!(err.is_transient());
}
