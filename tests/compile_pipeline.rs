//! End-to-end coverage of the compile pipeline: a fake renderer executable
//! drives the orchestrator, the artifact table, and the presenter.

#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use lopdf::{Document, Object, Stream, content::Content, dictionary};
use quaderno::{
    application::{
        compile::{ArtifactStore, CompileOrchestrator, CompileOutcome, DocumentRenderer,
            ProcessRenderer},
        present::{DocumentPresenter, PageSink},
    },
    domain::DateKey,
};
use quaderno_api_types::PresentEvent;
use tempfile::TempDir;

fn write_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let content = Content { operations: vec![] };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        kids.push(
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into(),
        );
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-renderer");
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

/// Renderer script that copies a prepared document into place and reports it
/// by bare file name, or fails when the source mentions `FAIL`.
fn copying_script(dir: &Path, fixture: &Path) -> PathBuf {
    write_script(
        dir,
        &format!(
            r#"case "$1" in
  *FAIL*)
    printf '{{"success": false, "log": "undefined control sequence"}}\n'
    ;;
  *)
    cp "{fixture}" "$4/$2.pdf"
    printf '{{"success": true, "pdfFileName": "%s.pdf"}}\n' "$2"
    ;;
esac
"#,
            fixture = fixture.display()
        ),
    )
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<PresentEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<PresentEvent> {
        self.events.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PageSink for RecordingSink {
    async fn emit(&self, event: PresentEvent) {
        self.events.lock().expect("lock").push(event);
    }
}

struct Pipeline {
    orchestrator: CompileOrchestrator,
    store: ArtifactStore,
    _dir: TempDir,
}

fn pipeline(script: impl Fn(&Path, &Path) -> PathBuf) -> Pipeline {
    let dir = TempDir::new().expect("temp dir");
    let fixture = dir.path().join("fixture.pdf");
    write_pdf(&fixture, 3);
    let script = script(dir.path(), &fixture);
    let store =
        ArtifactStore::new(dir.path().join("output_files"), "pdf").expect("artifact store");
    let renderer: Arc<dyn DocumentRenderer> =
        Arc::new(ProcessRenderer::new(script, store.clone()));
    let orchestrator = CompileOrchestrator::start(
        renderer,
        dir.path().join("assets/latex_template.tex"),
    );
    Pipeline {
        orchestrator,
        store,
        _dir: dir,
    }
}

fn key(raw: &str) -> DateKey {
    DateKey::parse(raw).expect("key")
}

#[tokio::test]
async fn compile_publishes_and_presents_the_artifact() {
    let pipeline = pipeline(copying_script);

    let outcome = pipeline
        .orchestrator
        .compile(key("2024-01-01"), "\\section{A}".to_string())
        .await;

    let artifact_path = match outcome {
        CompileOutcome::Success { artifact_path, .. } => artifact_path,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(artifact_path.ends_with("output_files/2024-01-01.pdf"));
    assert!(artifact_path.exists(), "artifact must be on disk");
    assert_eq!(
        pipeline.orchestrator.current_artifact(&key("2024-01-01")),
        Some(artifact_path.clone())
    );

    let presenter = DocumentPresenter::new();
    let sink = Arc::new(RecordingSink::default());
    presenter.present(artifact_path, sink.clone()).await;
    presenter.finish().await;

    let events = sink.events();
    assert_eq!(events[0], PresentEvent::Cleared);
    assert_eq!(events[1], PresentEvent::Loading);
    let pages: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            PresentEvent::PageDrawn { page, .. } => Some(page.number),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(
        events.last(),
        Some(&PresentEvent::Completed { total_pages: 3 })
    );
}

#[tokio::test]
async fn failed_compile_preserves_the_previous_artifact() {
    let pipeline = pipeline(copying_script);

    let first = pipeline
        .orchestrator
        .compile(key("2024-01-01"), "\\section{A}".to_string())
        .await;
    assert!(first.is_success());
    let published = pipeline
        .orchestrator
        .current_artifact(&key("2024-01-01"))
        .expect("published artifact");
    let original_bytes = fs::read(&published).expect("artifact bytes");

    let second = pipeline
        .orchestrator
        .compile(key("2024-01-01"), "\\FAIL{}".to_string())
        .await;
    match second {
        CompileOutcome::Failure { log, .. } => {
            assert_eq!(log.as_deref(), Some("undefined control sequence"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(
        pipeline.orchestrator.current_artifact(&key("2024-01-01")),
        Some(published.clone())
    );
    assert_eq!(
        fs::read(&published).expect("artifact bytes"),
        original_bytes,
        "failed compile must not disturb the artifact on disk"
    );
}

#[tokio::test]
async fn renderer_may_report_a_full_path_inside_the_output_dir() {
    let pipeline = pipeline(|dir, fixture| {
        write_script(
            dir,
            &format!(
                "cp \"{fixture}\" \"$4/$2.pdf\"\n\
                 printf '{{\"success\": true, \"pdfPath\": \"%s/%s.pdf\"}}\\n' \"$4\" \"$2\"\n",
                fixture = fixture.display()
            ),
        )
    });

    let outcome = pipeline
        .orchestrator
        .compile(key("2024-01-02"), "\\section{B}".to_string())
        .await;

    match outcome {
        CompileOutcome::Success { artifact_path, .. } => {
            assert_eq!(
                artifact_path,
                pipeline.store.artifact_path(&key("2024-01-02"))
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_artifact_is_reported_distinctly_from_compile_failure() {
    let pipeline = pipeline(|dir, _fixture| {
        // Reports success but produces a file that is not a document.
        write_script(
            dir,
            "echo 'garbage' > \"$4/$2.pdf\"\n\
             printf '{\"success\": true, \"pdfFileName\": \"%s.pdf\"}\\n' \"$2\"\n",
        )
    });

    let outcome = pipeline
        .orchestrator
        .compile(key("2024-01-03"), "\\section{C}".to_string())
        .await;
    let artifact_path = match outcome {
        CompileOutcome::Success { artifact_path, .. } => artifact_path,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let presenter = DocumentPresenter::new();
    let sink = Arc::new(RecordingSink::default());
    presenter.present(artifact_path, sink.clone()).await;
    presenter.finish().await;

    match sink.events().last() {
        Some(PresentEvent::Failed { message }) => {
            assert!(
                message.starts_with("artifact could not be read"),
                "got `{message}`"
            );
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}
