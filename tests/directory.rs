//! Builds a directory from a configuration file against local endpoints.
use std::io::Write;
use std::sync::Arc;

use cryptoki_sys::{CKF_SERIAL_SESSION, CKR_SLOT_ID_INVALID};

use p11nethsm::config::Config;
use p11nethsm::test;
use p11nethsm::SlotDirectory;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn directory_from_config_file() {
    let _ = stderrlog::new().verbosity(3).init();

    let (ready, ready_request) =
        test::one_shot_responder("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    let (busy, _busy_request) =
        test::one_shot_responder("HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    let unreachable = test::unreachable_url();

    let file = write_config(&format!(
        r#"
        probe_timeout_secs = 5

        [[slots]]
        label = "Fresh"
        description = "Not provisioned yet"
        url = "{unreachable}"
        sparse = true

        [[slots]]
        label = "Down"
        url = "{unreachable}"
        user = "operator"
        password = "secret"

        [[slots]]
        label = "Ready"
        url = "{ready}/api/v1"
        user = "operator"
        password = "secret"

        [[slots]]
        label = "Busy"
        url = "{busy}"
        "#
    ));

    let config = Config::read_config(file.path()).unwrap();
    config.verify().unwrap();

    let directory = SlotDirectory::new();
    directory.initialize(Arc::new(config)).unwrap();
    assert!(directory.is_initialized());
    assert_eq!(4, directory.slot_count());

    let fresh = directory.get_slot(0).unwrap();
    assert_eq!("Not provisioned yet", fresh.description());
    assert!(fresh.is_token_present());
    assert!(fresh.token().unwrap().is_login_required());

    assert!(!directory.get_slot(1).unwrap().is_token_present());

    let ready = directory.get_slot(2).unwrap();
    assert!(ready.is_token_present());
    assert!(!ready.token().unwrap().is_login_required());
    assert!(ready_request.join().unwrap().starts_with("GET /api/v1/health/ready "));

    assert!(!directory.get_slot(3).unwrap().is_token_present());
    assert_eq!(vec![0, 2], directory.slot_ids(true));

    let err = directory.get_slot(4).map(|_| ()).unwrap_err();
    assert_eq!(CKR_SLOT_ID_INVALID, err.rv());

    let handle = ready.open_session(CKF_SERIAL_SESSION).unwrap();
    assert_eq!(2, directory.get_session_slot(handle).unwrap().id());
    assert!(directory.get_session(handle).is_ok());

    directory.finalize();
    assert!(!directory.is_initialized());
    assert!(ready.context().is_cancelled());
    assert!(directory.get_session(handle).is_err());
    directory.finalize();
}
