use econect::compliance::{
    load_rules_from_path, ComplianceService, InMemoryRecordStore, Module, NewEndpointConfig,
    NewGrant, NewValidationRule, Principal, RecordStore, Role, RuleLevel, RuleOperator,
    StoreError, Unit, UnitEnvironment, UnitId, UserId,
};
use econect::config::TransmissionConfig;
use econect::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) const DEMO_ADMIN: UserId = UserId(1);
pub(crate) const DEMO_OPERATOR: UserId = UserId(2);
pub(crate) const DEMO_UNIT: UnitId = UnitId(1);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type Service = ComplianceService<InMemoryRecordStore>;

/// Seed a fresh store with a demo unit, two principals and the contracts endpoint.
pub(crate) fn seeded_store() -> Result<Arc<InMemoryRecordStore>, StoreError> {
    let store = Arc::new(InMemoryRecordStore::new());

    store.insert_unit(Unit {
        id: DEMO_UNIT,
        code: "UG001".to_string(),
        name: "Prefeitura Municipal de Exemplo".to_string(),
        environment: UnitEnvironment::Homologacao,
        production_token: None,
        homologation_token: Some("token-homolog-exemplo".to_string()),
        active: true,
    })?;

    store.insert_principal(Principal {
        id: DEMO_ADMIN,
        role: Role::Admin,
        active: true,
    })?;
    store.insert_principal(Principal {
        id: DEMO_OPERATOR,
        role: Role::Operator,
        active: true,
    })?;
    store.insert_grant(NewGrant {
        user_id: DEMO_OPERATOR,
        unit_id: Some(DEMO_UNIT),
        module: None,
        can_view: true,
        can_create: true,
        can_edit: true,
        can_delete: false,
        can_transmit: true,
    })?;

    store.insert_endpoint_config(NewEndpointConfig {
        module: Module::Contrato,
        endpoint: "/contratos".to_string(),
        method: "POST".to_string(),
        description: Some("Envio de contratos".to_string()),
        active: true,
    })?;

    Ok(store)
}

/// Rules installed when no catalog file is supplied.
pub(crate) fn default_rules() -> Vec<NewValidationRule> {
    let rule = |module, field: &str, operator, value: &str, level, code: &str, message: &str| {
        NewValidationRule {
            module,
            field: field.to_string(),
            operator,
            value: value.to_string(),
            level,
            code: code.to_string(),
            message: message.to_string(),
            active: true,
        }
    };

    vec![
        rule(
            Module::CompraDireta,
            "valor",
            RuleOperator::GreaterThan,
            "330000",
            RuleLevel::Impeditiva,
            "CD001",
            "Valor acima do limite para compra direta",
        ),
        rule(
            Module::CompraDireta,
            "fornecedor.cnpj",
            RuleOperator::Required,
            "",
            RuleLevel::Alerta,
            "CD002",
            "CNPJ do fornecedor nao informado",
        ),
        rule(
            Module::Contrato,
            "vigencia",
            RuleOperator::GreaterThan,
            "365",
            RuleLevel::Alerta,
            "CT001",
            "Vigencia superior a um ano",
        ),
    ]
}

/// Build the pipeline over a seeded in-memory store.
///
/// Must run off the async runtime when the HTTP transport is configured.
pub(crate) fn build_service(
    config: &TransmissionConfig,
    rules_csv: Option<PathBuf>,
) -> Result<Arc<Service>, AppError> {
    let store = seeded_store()?;
    let service = ComplianceService::from_config(store, config)?;

    let (rules, source) = match rules_csv {
        Some(path) => {
            let rules = load_rules_from_path(&path)?;
            (rules, path.display().to_string())
        }
        None => (default_rules(), "built-in".to_string()),
    };
    let installed = service.install_rules(rules)?;
    info!(installed, %source, "validation rules installed");

    Ok(Arc::new(service))
}
