use super::common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::compliance::audit::{AuditAction, AuditEntry, AuditError, AuditSink};
use crate::compliance::domain::{
    LogDirection, Module, RecordStatus, Remittance, RemittanceId, RemittanceStatus, SourceRecord,
    SourceRecordId,
};
use crate::compliance::error::ComplianceError;
use crate::compliance::repository::{RecordStore, RemittanceQuery};
use crate::compliance::service::ComplianceService;
use crate::compliance::transform::{TransformError, TransformMapper};
use crate::compliance::transmission::{MockOutcome, MockTransport, TransmissionAdapter};

fn ready_remittance(harness: &Harness) -> Remittance {
    let record = harness.compra_direta(25_000);
    harness
        .service
        .remittances()
        .create(&harness.principal(OPERATOR), record.id)
        .expect("remittance created")
}

fn status_of(harness: &Harness, id: RemittanceId) -> RemittanceStatus {
    harness
        .store
        .fetch_remittance(id)
        .expect("lookup")
        .expect("remittance exists")
        .status
}

fn record_status(harness: &Harness, id: SourceRecordId) -> RecordStatus {
    harness
        .store
        .fetch_record(id)
        .expect("lookup")
        .expect("record exists")
        .status
}

#[test]
fn blocking_violation_prevents_creation() {
    let harness = harness(MockOutcome::Accept);
    let record = harness.compra_direta(350_000);

    let err = harness
        .service
        .remittances()
        .create(&harness.principal(OPERATOR), record.id)
        .expect_err("creation blocked");

    match err {
        ComplianceError::ValidationBlocked { violations } => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].code, "CD001");
        }
        other => panic!("expected validation block, got {other:?}"),
    }
    assert!(harness
        .store
        .remittances_for_record(record.id)
        .expect("lookup")
        .is_empty());
    assert_eq!(record_status(&harness, record.id), RecordStatus::Error);
}

#[test]
fn clean_record_becomes_ready_remittance() {
    let harness = harness(MockOutcome::Accept);
    let record = harness.compra_direta(25_000);

    let remittance = harness
        .service
        .remittances()
        .create(&harness.principal(OPERATOR), record.id)
        .expect("remittance created");

    assert_eq!(remittance.status, RemittanceStatus::Ready);
    assert_eq!(remittance.source_record_id, record.id);
    assert_eq!(remittance.unit_id, UG001);
    assert_eq!(remittance.module, Module::CompraDireta);
    assert_eq!(remittance.payload["modulo"], json!("COMPRA_DIRETA"));
    assert_eq!(remittance.payload["dados"]["valor"], json!(25_000));
    assert!(remittance.protocol.is_none());
    assert_eq!(record_status(&harness, record.id), RecordStatus::Processed);

    let audit = harness.audit.entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Create);
    assert_eq!(audit[0].principal_id, OPERATOR);
}

#[test]
fn advisory_violations_do_not_block_creation() {
    let harness = harness(MockOutcome::Accept);
    let record = harness.record(UG001, Module::Contrato, json!({ "vigencia": 900 }));

    let remittance = harness
        .service
        .remittances()
        .create(&harness.principal(ADMIN), record.id)
        .expect("advisory only");

    assert_eq!(remittance.status, RemittanceStatus::Ready);
    assert_eq!(
        harness
            .store
            .validation_results(record.id)
            .expect("results")
            .len(),
        1
    );
}

#[test]
fn only_one_active_remittance_per_record() {
    let harness = harness(MockOutcome::Accept);
    let operator = harness.principal(OPERATOR);
    let first = ready_remittance(&harness);

    let duplicate = harness
        .service
        .remittances()
        .create(&operator, first.source_record_id);
    assert!(matches!(duplicate, Err(ComplianceError::Conflict(_))));

    harness
        .service
        .remittances()
        .cancel(&operator, first.id)
        .expect("cancelled");
    let second = harness
        .service
        .remittances()
        .create(&operator, first.source_record_id)
        .expect("new cycle allowed after cancel");
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, RemittanceStatus::Ready);
}

#[test]
fn creation_checks_existence_before_permission() {
    let harness = harness(MockOutcome::Accept);
    let stranger = harness.principal(STRANGER);

    let missing = harness
        .service
        .remittances()
        .create(&stranger, SourceRecordId(999));
    assert!(matches!(missing, Err(ComplianceError::NotFound { .. })));

    let record = harness.compra_direta(25_000);
    let forbidden = harness.service.remittances().create(&stranger, record.id);
    assert!(matches!(
        forbidden,
        Err(ComplianceError::Forbidden { .. })
    ));

    let viewer = harness.principal(VIEWER);
    assert!(matches!(
        harness.service.remittances().create(&viewer, record.id),
        Err(ComplianceError::Forbidden { .. })
    ));
    assert_eq!(record_status(&harness, record.id), RecordStatus::Received);
}

#[test]
fn operator_cannot_touch_other_units() {
    let harness = harness(MockOutcome::Accept);
    let record = harness.record(UG002, Module::CompraDireta, json!({ "valor": 1 }));
    let remittance = harness
        .service
        .remittances()
        .create(&harness.principal(ADMIN), record.id)
        .expect("admin creates");

    let operator = harness.principal(OPERATOR);
    assert!(matches!(
        harness.service.remittances().get(&operator, remittance.id),
        Err(ComplianceError::Forbidden { .. })
    ));
    assert!(matches!(
        harness.service.remittances().send(&operator, remittance.id),
        Err(ComplianceError::Forbidden { .. })
    ));
    assert_eq!(status_of(&harness, remittance.id), RemittanceStatus::Ready);
}

#[test]
fn successful_send_records_protocol_and_logs() {
    let harness = harness(MockOutcome::Accept);
    let remittance = ready_remittance(&harness);

    let result = harness
        .service
        .remittances()
        .send(&harness.principal(OPERATOR), remittance.id)
        .expect("sent");

    assert_eq!(result.remittance.status, RemittanceStatus::Sent);
    let protocol = result.remittance.protocol.clone().expect("protocol stored");
    assert!(protocol.starts_with("TCE-"));
    assert!(result.remittance.sent_at.is_some());
    assert!(result.remittance.error_msg.is_none());
    assert!(result.transmission.success);
    assert_eq!(result.transmission.protocol.as_deref(), Some(protocol.as_str()));

    let logs = harness
        .service
        .remittances()
        .logs(&harness.principal(VIEWER), remittance.id)
        .expect("logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].direction, LogDirection::Request);
    assert_eq!(logs[1].direction, LogDirection::Response);
    assert!(logs[0].created_at <= logs[1].created_at);
    assert_eq!(logs[1].status_code, Some(200));
    assert!(logs[1].duration_ms.is_some());

    let headers = logs[0].headers.as_ref().expect("request headers");
    assert_eq!(headers["Authorization"], "Bearer token-homo...");
    assert_eq!(
        logs[0].url.as_deref(),
        Some("https://tce.example/esfinge/compra-direta")
    );
    assert_eq!(logs[0].body, remittance.payload);
}

#[test]
fn send_is_only_legal_from_ready() {
    let harness = harness(MockOutcome::Accept);
    let operator = harness.principal(OPERATOR);
    let remittance = ready_remittance(&harness);

    harness
        .service
        .remittances()
        .send(&operator, remittance.id)
        .expect("first send");
    let err = harness
        .service
        .remittances()
        .send(&operator, remittance.id)
        .expect_err("already sent");

    assert!(matches!(
        err,
        ComplianceError::InvalidTransition {
            status: RemittanceStatus::Sent,
            ..
        }
    ));
    assert!(err
        .to_string()
        .contains("is not ready for transmission, current status SENT"));
    assert_eq!(
        harness
            .store
            .logs_for(remittance.id)
            .expect("logs")
            .len(),
        2,
        "rejected send must not reach the transport"
    );
}

#[test]
fn transport_failure_marks_error_then_retry_resets() {
    let harness = harness(MockOutcome::Unreachable);
    let operator = harness.principal(OPERATOR);
    let remittance = ready_remittance(&harness);

    let err = harness
        .service
        .remittances()
        .send(&operator, remittance.id)
        .expect_err("transport fails");
    assert!(matches!(
        err,
        ComplianceError::Transmission { remittance_id, .. } if remittance_id == remittance.id
    ));

    let failed = harness
        .store
        .fetch_remittance(remittance.id)
        .expect("lookup")
        .expect("exists");
    assert_eq!(failed.status, RemittanceStatus::Error);
    let message = failed.error_msg.expect("error message stored");
    assert!(message.contains("connection refused"), "{message}");

    let logs = harness.store.logs_for(remittance.id).expect("logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].status_code, Some(500));
    assert_eq!(logs[1].body["success"], Value::Bool(false));

    let retried = harness
        .service
        .remittances()
        .retry(&operator, remittance.id)
        .expect("retry from error");
    assert_eq!(retried.status, RemittanceStatus::Ready);
    assert!(retried.error_msg.is_none());
}

#[test]
fn retry_refuses_while_a_newer_remittance_is_active() {
    let harness = harness(MockOutcome::Unreachable);
    let operator = harness.principal(OPERATOR);
    let first = ready_remittance(&harness);
    harness
        .service
        .remittances()
        .send(&operator, first.id)
        .expect_err("transport fails");
    assert_eq!(status_of(&harness, first.id), RemittanceStatus::Error);

    let second = harness
        .service
        .remittances()
        .create(&operator, first.source_record_id)
        .expect("errored remittance does not block a new one");
    assert_eq!(second.status, RemittanceStatus::Ready);

    let err = harness
        .service
        .remittances()
        .retry(&operator, first.id)
        .expect_err("newer remittance is active");
    assert!(matches!(err, ComplianceError::Conflict(_)), "{err:?}");
    assert_eq!(status_of(&harness, first.id), RemittanceStatus::Error);

    let ready: Vec<_> = harness
        .store
        .remittances_for_record(first.source_record_id)
        .expect("lookup")
        .into_iter()
        .filter(|remittance| remittance.status == RemittanceStatus::Ready)
        .map(|remittance| remittance.id)
        .collect();
    assert_eq!(ready, vec![second.id]);

    harness
        .service
        .remittances()
        .cancel(&operator, second.id)
        .expect("cancelled");
    let retried = harness
        .service
        .remittances()
        .retry(&operator, first.id)
        .expect("retry once the newer remittance is cancelled");
    assert_eq!(retried.status, RemittanceStatus::Ready);
}

#[test]
fn rejection_is_recorded_with_authority_status() {
    let harness = harness(MockOutcome::Reject);
    let remittance = ready_remittance(&harness);

    let err = harness
        .service
        .remittances()
        .send(&harness.principal(ADMIN), remittance.id)
        .expect_err("rejected");
    match err {
        ComplianceError::Transmission { errors, .. } => assert!(!errors.is_empty()),
        other => panic!("expected transmission error, got {other:?}"),
    }

    assert_eq!(status_of(&harness, remittance.id), RemittanceStatus::Error);
    let logs = harness.store.logs_for(remittance.id).expect("logs");
    assert_eq!(logs[1].status_code, Some(400));
}

#[test]
fn retry_is_only_legal_from_error() {
    let harness = harness(MockOutcome::Accept);
    let operator = harness.principal(OPERATOR);

    let ready = ready_remittance(&harness);
    let sent = {
        let remittance = ready_remittance_for(&harness, 10_000);
        harness
            .service
            .remittances()
            .send(&operator, remittance.id)
            .expect("sent");
        remittance
    };
    let cancelled = {
        let remittance = ready_remittance_for(&harness, 20_000);
        harness
            .service
            .remittances()
            .cancel(&operator, remittance.id)
            .expect("cancelled");
        remittance
    };

    for (id, expected) in [
        (ready.id, RemittanceStatus::Ready),
        (sent.id, RemittanceStatus::Sent),
        (cancelled.id, RemittanceStatus::Cancelled),
    ] {
        let err = harness
            .service
            .remittances()
            .retry(&operator, id)
            .expect_err("retry rejected");
        assert!(matches!(err, ComplianceError::InvalidTransition { status, .. } if status == expected));
        assert_eq!(status_of(&harness, id), expected);
    }
}

fn ready_remittance_for(harness: &Harness, valor: u64) -> Remittance {
    let record: SourceRecord = harness.compra_direta(valor);
    harness
        .service
        .remittances()
        .create(&harness.principal(ADMIN), record.id)
        .expect("remittance created")
}

#[test]
fn cancel_rejects_terminal_states() {
    let harness = harness(MockOutcome::Accept);
    let operator = harness.principal(OPERATOR);
    let remittance = ready_remittance(&harness);

    let cancelled = harness
        .service
        .remittances()
        .cancel(&operator, remittance.id)
        .expect("cancel from ready");
    assert_eq!(cancelled.status, RemittanceStatus::Cancelled);

    let again = harness
        .service
        .remittances()
        .cancel(&operator, remittance.id)
        .expect_err("already cancelled");
    assert!(again.to_string().contains("cannot be cancelled"));

    let sent = ready_remittance_for(&harness, 1_000);
    harness
        .service
        .remittances()
        .send(&operator, sent.id)
        .expect("sent");
    assert!(matches!(
        harness.service.remittances().cancel(&operator, sent.id),
        Err(ComplianceError::InvalidTransition {
            status: RemittanceStatus::Sent,
            ..
        })
    ));

    let audit_actions: Vec<_> = harness
        .audit
        .entries()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(audit_actions.contains(&AuditAction::Cancel));
}

#[test]
fn cancel_from_error_is_allowed() {
    let harness = harness(MockOutcome::Unreachable);
    let operator = harness.principal(OPERATOR);
    let remittance = ready_remittance(&harness);
    let _ = harness.service.remittances().send(&operator, remittance.id);

    let cancelled = harness
        .service
        .remittances()
        .cancel(&operator, remittance.id)
        .expect("cancel from error");
    assert_eq!(cancelled.status, RemittanceStatus::Cancelled);
}

#[test]
fn viewer_cannot_transmit_or_cancel() {
    let harness = harness(MockOutcome::Accept);
    let viewer = harness.principal(VIEWER);
    let remittance = ready_remittance(&harness);

    assert!(harness.service.remittances().get(&viewer, remittance.id).is_ok());
    assert!(matches!(
        harness.service.remittances().send(&viewer, remittance.id),
        Err(ComplianceError::Forbidden { .. })
    ));
    assert!(matches!(
        harness.service.remittances().cancel(&viewer, remittance.id),
        Err(ComplianceError::Forbidden { .. })
    ));
    assert!(matches!(
        harness.service.remittances().get(&viewer, RemittanceId(77)),
        Err(ComplianceError::NotFound { .. })
    ));
}

#[test]
fn listing_is_scoped_paginated_and_newest_first() {
    let harness = harness(MockOutcome::Accept);
    let admin = harness.principal(ADMIN);

    let ug001: Vec<_> = (0..3)
        .map(|offset| ready_remittance_for(&harness, 1_000 + offset))
        .collect();
    let other = harness.record(UG002, Module::CompraDireta, json!({ "valor": 5 }));
    let ug002 = harness
        .service
        .remittances()
        .create(&admin, other.id)
        .expect("created");

    let operator_page = harness
        .service
        .remittances()
        .list(&harness.principal(OPERATOR), RemittanceQuery::default())
        .expect("listed");
    assert_eq!(operator_page.total, 3);
    assert!(operator_page.data.iter().all(|item| item.unit_id == UG001));

    let admin_page = harness
        .service
        .remittances()
        .list(
            &admin,
            RemittanceQuery {
                page: 1,
                limit: 2,
                ..RemittanceQuery::default()
            },
        )
        .expect("listed");
    assert_eq!(admin_page.total, 4);
    assert_eq!(admin_page.data.len(), 2);
    assert_eq!(admin_page.data[0].id, ug002.id);
    assert_eq!(admin_page.data[1].id, ug001[2].id);

    let second_page = harness
        .service
        .remittances()
        .list(
            &admin,
            RemittanceQuery {
                page: 2,
                limit: 2,
                ..RemittanceQuery::default()
            },
        )
        .expect("listed");
    let ids: Vec<_> = second_page.data.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![ug001[1].id, ug001[0].id]);

    let filtered = harness
        .service
        .remittances()
        .list(
            &admin,
            RemittanceQuery {
                unit_id: Some(UG002),
                status: Some(RemittanceStatus::Ready),
                ..RemittanceQuery::default()
            },
        )
        .expect("listed");
    assert_eq!(filtered.total, 1);

    let none = harness
        .service
        .remittances()
        .list(&harness.principal(STRANGER), RemittanceQuery::default())
        .expect("listed");
    assert_eq!(none.total, 0);
}

#[test]
fn stats_group_by_status_and_module() {
    let harness = harness(MockOutcome::Accept);
    let admin = harness.principal(ADMIN);

    let sent = ready_remittance_for(&harness, 1);
    harness
        .service
        .remittances()
        .send(&admin, sent.id)
        .expect("sent");
    ready_remittance_for(&harness, 2);
    let contract = harness.record(UG002, Module::Contrato, json!({ "vigencia": 30 }));
    harness
        .service
        .remittances()
        .create(&admin, contract.id)
        .expect("created");

    let stats = harness.service.remittances().stats(&admin).expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status.get(&RemittanceStatus::Sent), Some(&1));
    assert_eq!(stats.by_status.get(&RemittanceStatus::Ready), Some(&2));
    assert_eq!(stats.by_module.get(&Module::CompraDireta), Some(&2));
    assert_eq!(stats.by_module.get(&Module::Contrato), Some(&1));

    let scoped = harness
        .service
        .remittances()
        .stats(&harness.principal(OPERATOR))
        .expect("stats");
    assert_eq!(scoped.total, 2);
}

struct FailingMapper;

impl TransformMapper for FailingMapper {
    fn transform(&self, record: &SourceRecord) -> Result<Value, TransformError> {
        Err(TransformError::Mapping {
            module: record.module,
            reason: "missing layout".to_string(),
        })
    }
}

struct BrokenAuditSink;

impl AuditSink for BrokenAuditSink {
    fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Err(AuditError("sink offline".to_string()))
    }
}

fn service_with(
    mapper: Arc<dyn TransformMapper>,
    audit: Arc<dyn AuditSink>,
) -> (
    Arc<crate::compliance::memory::InMemoryRecordStore>,
    ComplianceService<crate::compliance::memory::InMemoryRecordStore>,
) {
    let store = seeded_store();
    let adapter = TransmissionAdapter::new(
        store.clone(),
        Box::new(MockTransport::new(MockOutcome::Accept)),
        BASE_URL,
    );
    let service = ComplianceService::with_collaborators(store.clone(), adapter, mapper, audit);
    (store, service)
}

#[test]
fn transform_failure_aborts_creation() {
    let (store, service) = service_with(
        Arc::new(FailingMapper),
        Arc::new(crate::compliance::audit::MemoryAuditSink::default()),
    );
    let admin = crate::compliance::domain::Principal {
        id: ADMIN,
        role: crate::compliance::domain::Role::Admin,
        active: true,
    };
    let record = store
        .insert_record(crate::compliance::domain::NewSourceRecord {
            unit_id: UG001,
            module: Module::CompraDireta,
            competency: "2025-04".parse().expect("valid competency"),
            payload: json!({ "valor": 10 }),
        })
        .expect("stored");

    let err = service
        .remittances()
        .create(&admin, record.id)
        .expect_err("transform fails");
    assert!(matches!(err, ComplianceError::Transform(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    assert!(store
        .remittances_for_record(record.id)
        .expect("lookup")
        .is_empty());
    assert_eq!(
        store.fetch_record(record.id).expect("lookup").expect("exists").status,
        RecordStatus::Error
    );
}

#[test]
fn audit_sink_failure_does_not_fail_operations() {
    let (store, service) = service_with(
        Arc::new(crate::compliance::transform::EnvelopeMapper),
        Arc::new(BrokenAuditSink),
    );
    let admin = crate::compliance::domain::Principal {
        id: ADMIN,
        role: crate::compliance::domain::Role::Admin,
        active: true,
    };
    let record = store
        .insert_record(crate::compliance::domain::NewSourceRecord {
            unit_id: UG001,
            module: Module::Empenho,
            competency: "2025-04".parse().expect("valid competency"),
            payload: json!({ "numero": "2025NE0001" }),
        })
        .expect("stored");

    let remittance = service
        .remittances()
        .create(&admin, record.id)
        .expect("created despite audit failure");
    let sent = service
        .remittances()
        .send(&admin, remittance.id)
        .expect("sent despite audit failure");
    assert_eq!(sent.remittance.status, RemittanceStatus::Sent);
}

#[test]
fn concurrent_sends_transmit_once() {
    let transport = RecordingTransport {
        delay: Some(Duration::from_millis(50)),
        ..RecordingTransport::default()
    };
    let harness = harness_with_transport(Box::new(transport.clone()));
    let remittance = ready_remittance(&harness);
    let principal = harness.principal(OPERATOR);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = harness.service.clone();
            thread::spawn(move || service.remittances().send(&principal, remittance.id))
        })
        .collect();
    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker finishes"))
        .collect();

    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes.iter().filter(|outcome| outcome.is_err()).all(|outcome| matches!(
        outcome,
        Err(ComplianceError::InvalidTransition { .. })
    )));
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(status_of(&harness, remittance.id), RemittanceStatus::Sent);
}

#[test]
fn concurrent_creates_produce_one_remittance() {
    let harness = harness(MockOutcome::Accept);
    let record = harness.compra_direta(12_000);
    let principal = harness.principal(OPERATOR);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = harness.service.clone();
            thread::spawn(move || service.remittances().create(&principal, record.id))
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker finishes"))
        .filter(|outcome| outcome.is_ok())
        .count();

    assert_eq!(created, 1);
    assert_eq!(
        harness
            .store
            .remittances_for_record(record.id)
            .expect("lookup")
            .len(),
        1
    );
}
