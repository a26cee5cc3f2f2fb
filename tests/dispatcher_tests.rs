//! Document delivery: reference first, local file as the fallback.

mod common;

use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

use common::{RecordingMessenger, Sent};
use guide_funnel_bot::dispatcher::{Delivery, DocumentDispatcher, GuideDocument};
use guide_funnel_bot::errors::DispatchError;

fn dispatcher(messenger: &Arc<RecordingMessenger>) -> DocumentDispatcher {
    DocumentDispatcher::new(messenger.clone())
}

fn pdf_file() -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
    file.write_all(b"%PDF-1.4 guide body")?;
    Ok(file)
}

#[tokio::test]
async fn test_reference_is_used_when_accepted() -> Result<()> {
    let messenger = Arc::new(RecordingMessenger::new());
    let document = GuideDocument {
        name: "Wine guide".to_string(),
        file_ref: Some("FILE_1".to_string()),
        path: Some(PathBuf::from("/nonexistent/guide.pdf")),
    };

    let delivery = dispatcher(&messenger).send(42, &document, "Here").await?;
    assert_eq!(delivery, Delivery::ByReference);
    assert_eq!(
        messenger.documents(),
        vec![Sent::DocumentRef {
            chat_id: 42,
            file_ref: "FILE_1".to_string()
        }]
    );
    Ok(())
}

#[tokio::test]
async fn test_rejected_reference_falls_back_to_file() -> Result<()> {
    let messenger = Arc::new(RecordingMessenger::new());
    messenger.reject_references(true);
    let file = pdf_file()?;
    let document = GuideDocument {
        name: "Wine guide".to_string(),
        file_ref: Some("STALE".to_string()),
        path: Some(file.path().to_path_buf()),
    };

    let delivery = dispatcher(&messenger).send(42, &document, "Here").await?;
    assert_eq!(delivery, Delivery::FromFile { bytes: 19 });

    match &messenger.documents()[..] {
        [Sent::DocumentBytes {
            chat_id,
            file_name,
            size,
        }] => {
            assert_eq!(*chat_id, 42);
            assert!(file_name.ends_with(".pdf"));
            assert_eq!(*size, 19);
        }
        other => panic!("unexpected deliveries: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_path_only_document() -> Result<()> {
    let messenger = Arc::new(RecordingMessenger::new());
    let file = pdf_file()?;
    let document = GuideDocument {
        name: "Wine guide".to_string(),
        file_ref: None,
        path: Some(file.path().to_path_buf()),
    };

    let delivery = dispatcher(&messenger).send(42, &document, "Here").await?;
    assert!(matches!(delivery, Delivery::FromFile { .. }));
    Ok(())
}

#[tokio::test]
async fn test_both_sources_failing_names_both_causes() -> Result<()> {
    let messenger = Arc::new(RecordingMessenger::new());
    messenger.reject_references(true);
    let document = GuideDocument {
        name: "Wine guide".to_string(),
        file_ref: Some("STALE".to_string()),
        path: Some(PathBuf::from("/nonexistent/guide.pdf")),
    };

    let err = dispatcher(&messenger)
        .send(42, &document, "Here")
        .await
        .unwrap_err();
    match err {
        DispatchError::Exhausted(causes) => {
            assert_eq!(causes.len(), 2);
            assert!(causes[0].starts_with("reference"));
            assert!(causes[1].contains("/nonexistent/guide.pdf"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(messenger.documents().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_document_without_source() -> Result<()> {
    let messenger = Arc::new(RecordingMessenger::new());
    let document = GuideDocument {
        name: "Empty".to_string(),
        file_ref: None,
        path: None,
    };

    let err = dispatcher(&messenger)
        .send(42, &document, "Here")
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::NoSource);
    Ok(())
}
