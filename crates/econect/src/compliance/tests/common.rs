use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::to_bytes;
use axum::response::Response;
use serde_json::{json, Value};

use crate::compliance::audit::MemoryAuditSink;
use crate::compliance::domain::{
    Module, NewEndpointConfig, NewGrant, NewSourceRecord, NewValidationRule, Principal, Role,
    RuleLevel, RuleOperator, SourceRecord, Unit, UnitEnvironment, UnitId, UserId,
};
use crate::compliance::memory::InMemoryRecordStore;
use crate::compliance::repository::RecordStore;
use crate::compliance::service::ComplianceService;
use crate::compliance::transform::EnvelopeMapper;
use crate::compliance::transmission::{
    MockOutcome, MockTransport, TceReply, TceTransport, TransmissionAdapter, TransmissionRequest,
    TransportError,
};

pub(super) const BASE_URL: &str = "https://tce.example/esfinge";

pub(super) const ADMIN: UserId = UserId(1);
pub(super) const OPERATOR: UserId = UserId(2);
pub(super) const VIEWER: UserId = UserId(3);
pub(super) const INACTIVE: UserId = UserId(4);
pub(super) const STRANGER: UserId = UserId(5);

pub(super) const UG001: UnitId = UnitId(1);
pub(super) const UG002: UnitId = UnitId(2);

pub(super) type Service = ComplianceService<InMemoryRecordStore>;

pub(super) struct Harness {
    pub(super) store: Arc<InMemoryRecordStore>,
    pub(super) service: Arc<Service>,
    pub(super) audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub(super) fn principal(&self, id: UserId) -> Principal {
        use crate::compliance::repository::IdentityProvider;
        self.store
            .principal(id)
            .expect("identity lookup")
            .expect("seeded principal")
    }

    pub(super) fn record(&self, unit_id: UnitId, module: Module, payload: Value) -> SourceRecord {
        self.store
            .insert_record(NewSourceRecord {
                unit_id,
                module,
                competency: "2025-03".parse().expect("valid competency"),
                payload,
            })
            .expect("record stored")
    }

    pub(super) fn compra_direta(&self, valor: u64) -> SourceRecord {
        self.record(
            UG001,
            Module::CompraDireta,
            json!({ "valor": valor, "fornecedor": { "cnpj": "12.345.678/0001-90" } }),
        )
    }
}

/// Store seeded with two units, principals, grants, rules and one endpoint.
pub(super) fn seeded_store() -> Arc<InMemoryRecordStore> {
    let store = Arc::new(InMemoryRecordStore::new());

    store
        .insert_unit(Unit {
            id: UG001,
            code: "UG001".to_string(),
            name: "Prefeitura Municipal".to_string(),
            environment: UnitEnvironment::Homologacao,
            production_token: None,
            homologation_token: Some("token-homolog-exemplo".to_string()),
            active: true,
        })
        .expect("unit stored");
    store
        .insert_unit(Unit {
            id: UG002,
            code: "UG002".to_string(),
            name: "Camara Municipal".to_string(),
            environment: UnitEnvironment::Producao,
            production_token: Some("token-producao-camara".to_string()),
            homologation_token: Some("token-homolog-camara".to_string()),
            active: true,
        })
        .expect("unit stored");

    for (id, role, active) in [
        (ADMIN, Role::Admin, true),
        (OPERATOR, Role::Operator, true),
        (VIEWER, Role::Viewer, true),
        (INACTIVE, Role::Operator, false),
        (STRANGER, Role::Operator, true),
    ] {
        store
            .insert_principal(Principal { id, role, active })
            .expect("principal stored");
    }

    store
        .insert_grant(NewGrant {
            user_id: OPERATOR,
            unit_id: Some(UG001),
            can_view: true,
            can_create: true,
            can_edit: true,
            can_delete: true,
            can_transmit: true,
            ..NewGrant::default()
        })
        .expect("grant stored");
    store
        .insert_grant(NewGrant {
            user_id: VIEWER,
            can_view: true,
            ..NewGrant::default()
        })
        .expect("grant stored");
    store
        .insert_grant(NewGrant {
            user_id: INACTIVE,
            can_view: true,
            can_create: true,
            can_transmit: true,
            ..NewGrant::default()
        })
        .expect("grant stored");

    for rule in default_rules() {
        store.insert_rule(rule).expect("rule stored");
    }

    store
        .insert_endpoint_config(NewEndpointConfig {
            module: Module::Contrato,
            endpoint: "/contratos".to_string(),
            method: "POST".to_string(),
            description: Some("Envio de contratos".to_string()),
            active: true,
        })
        .expect("endpoint stored");

    store
}

pub(super) fn default_rules() -> Vec<NewValidationRule> {
    vec![
        NewValidationRule {
            module: Module::CompraDireta,
            field: "valor".to_string(),
            operator: RuleOperator::GreaterThan,
            value: "330000".to_string(),
            level: RuleLevel::Impeditiva,
            code: "CD001".to_string(),
            message: "Valor acima do limite para compra direta".to_string(),
            active: true,
        },
        NewValidationRule {
            module: Module::Contrato,
            field: "vigencia".to_string(),
            operator: RuleOperator::GreaterThan,
            value: "365".to_string(),
            level: RuleLevel::Alerta,
            code: "CT001".to_string(),
            message: "Vigencia superior a um ano".to_string(),
            active: true,
        },
    ]
}

pub(super) fn harness(outcome: MockOutcome) -> Harness {
    harness_with_transport(Box::new(MockTransport::new(outcome)))
}

pub(super) fn harness_with_transport(transport: Box<dyn TceTransport>) -> Harness {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::default());
    let adapter = TransmissionAdapter::new(store.clone(), transport, BASE_URL);
    let service = Arc::new(ComplianceService::with_collaborators(
        store.clone(),
        adapter,
        Arc::new(EnvelopeMapper),
        audit.clone(),
    ));
    Harness {
        store,
        service,
        audit,
    }
}

/// Transport that accepts everything and remembers what it was asked to send.
#[derive(Clone, Default)]
pub(super) struct RecordingTransport {
    pub(super) requests: Arc<Mutex<Vec<TransmissionRequest>>>,
    pub(super) delay: Option<Duration>,
}

impl RecordingTransport {
    pub(super) fn requests(&self) -> Vec<TransmissionRequest> {
        self.requests.lock().expect("requests mutex").clone()
    }
}

impl TceTransport for RecordingTransport {
    fn deliver(&self, request: &TransmissionRequest) -> Result<TceReply, TransportError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.requests
            .lock()
            .expect("requests mutex")
            .push(request.clone());
        Ok(TceReply {
            status_code: 201,
            accepted: true,
            protocol: Some("TCE-RECORDED".to_string()),
            message: "ok".to_string(),
            errors: Vec::new(),
            body: json!({ "protocolo": "TCE-RECORDED" }),
        })
    }

    fn mode(&self) -> &'static str {
        "recording"
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
