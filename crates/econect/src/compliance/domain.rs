use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

identifier!(
    /// Identifier of an ingested source record.
    SourceRecordId
);
identifier!(
    /// Identifier of a submission package.
    RemittanceId
);
identifier!(
    /// Identifier of a reporting unit (UG).
    UnitId
);
identifier!(
    /// Identifier of an authenticated principal.
    UserId
);
identifier!(RuleId);
identifier!(ValidationResultId);
identifier!(RemittanceLogId);
identifier!(GrantId);
identifier!(EndpointConfigId);

/// Closed set of reporting domains accepted by the oversight authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Module {
    Contrato,
    CompraDireta,
    Empenho,
    Liquidacao,
    Pagamento,
    ExecucaoOrcamentaria,
    Convenio,
    Licitacao,
    Ppa,
    Ldo,
    Loa,
    AlteracaoOrcamentaria,
}

impl Module {
    pub const ALL: [Module; 12] = [
        Module::Contrato,
        Module::CompraDireta,
        Module::Empenho,
        Module::Liquidacao,
        Module::Pagamento,
        Module::ExecucaoOrcamentaria,
        Module::Convenio,
        Module::Licitacao,
        Module::Ppa,
        Module::Ldo,
        Module::Loa,
        Module::AlteracaoOrcamentaria,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Module::Contrato => "CONTRATO",
            Module::CompraDireta => "COMPRA_DIRETA",
            Module::Empenho => "EMPENHO",
            Module::Liquidacao => "LIQUIDACAO",
            Module::Pagamento => "PAGAMENTO",
            Module::ExecucaoOrcamentaria => "EXECUCAO_ORCAMENTARIA",
            Module::Convenio => "CONVENIO",
            Module::Licitacao => "LICITACAO",
            Module::Ppa => "PPA",
            Module::Ldo => "LDO",
            Module::Loa => "LOA",
            Module::AlteracaoOrcamentaria => "ALTERACAO_ORCAMENTARIA",
        }
    }

    /// Endpoint path used when no endpoint configuration exists for the module.
    pub fn default_endpoint(self) -> String {
        format!("/{}", self.as_str().to_ascii_lowercase().replace('_', "-"))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Module::ALL
            .into_iter()
            .find(|module| module.as_str() == normalized)
            .ok_or_else(|| UnknownModule(value.to_string()))
    }
}

/// Reporting period (year-month) a record belongs to, serialized as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Competency {
    year: i32,
    month: u32,
}

impl Competency {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidCompetency> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|date| Self {
                year: date.year(),
                month: date.month(),
            })
            .ok_or_else(|| InvalidCompetency(format!("{year:04}-{month:02}")))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("competency '{0}' must be formatted as YYYY-MM")]
pub struct InvalidCompetency(pub String);

impl FromStr for Competency {
    type Err = InvalidCompetency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| InvalidCompetency(value.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(InvalidCompetency(value.to_string()));
        }
        let year = year
            .parse::<i32>()
            .map_err(|_| InvalidCompetency(value.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| InvalidCompetency(value.to_string()))?;
        Competency::new(year, month).map_err(|_| InvalidCompetency(value.to_string()))
    }
}

impl TryFrom<String> for Competency {
    type Error = InvalidCompetency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Competency> for String {
    fn from(value: Competency) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Competency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Received,
    Processing,
    Processed,
    Error,
}

/// Raw procurement/financial record ingested from a source unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceRecordId,
    pub unit_id: UnitId,
    pub module: Module,
    pub competency: Competency,
    pub payload: Value,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ingestion request; the store assigns identifier, status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSourceRecord {
    pub unit_id: UnitId,
    pub module: Module,
    pub competency: Competency,
    pub payload: Value,
}

/// Comparison applied by a rule. Each operator encodes the violation condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    Regex,
    Required,
}

impl FromStr for RuleOperator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(value.trim().to_ascii_uppercase()))
            .map_err(|_| format!("unknown operator '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleLevel {
    /// Blocks remittance creation.
    Impeditiva,
    /// Advisory only.
    Alerta,
}

impl RuleLevel {
    pub const fn is_blocking(self) -> bool {
        matches!(self, RuleLevel::Impeditiva)
    }
}

impl FromStr for RuleLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "IMPEDITIVA" => Ok(RuleLevel::Impeditiva),
            "ALERTA" => Ok(RuleLevel::Alerta),
            _ => Err(format!("unknown level '{value}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: RuleId,
    pub module: Module,
    /// Dot-delimited path into the record payload.
    pub field: String,
    pub operator: RuleOperator,
    pub value: String,
    pub level: RuleLevel,
    pub code: String,
    pub message: String,
    pub active: bool,
}

/// Rule definition prior to persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewValidationRule {
    pub module: Module,
    pub field: String,
    pub operator: RuleOperator,
    pub value: String,
    pub level: RuleLevel,
    pub code: String,
    pub message: String,
    pub active: bool,
}

/// Persisted violation produced by one fired rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: ValidationResultId,
    pub record_id: SourceRecordId,
    pub rule_id: RuleId,
    pub code: String,
    pub level: RuleLevel,
    pub field: String,
    pub message: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Violation ready to be persisted; the store assigns identifier and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValidationResult {
    pub record_id: SourceRecordId,
    pub rule_id: RuleId,
    pub code: String,
    pub level: RuleLevel,
    pub field: String,
    pub message: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemittanceStatus {
    Validating,
    Ready,
    Sending,
    Sent,
    Error,
    Cancelled,
}

impl RemittanceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RemittanceStatus::Validating => "VALIDATING",
            RemittanceStatus::Ready => "READY",
            RemittanceStatus::Sending => "SENDING",
            RemittanceStatus::Sent => "SENT",
            RemittanceStatus::Error => "ERROR",
            RemittanceStatus::Cancelled => "CANCELLED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, RemittanceStatus::Sent | RemittanceStatus::Cancelled)
    }

    /// Statuses that prevent a second remittance for the same source record.
    pub const fn blocks_new_remittance(self) -> bool {
        matches!(
            self,
            RemittanceStatus::Validating | RemittanceStatus::Ready | RemittanceStatus::Sending
        )
    }
}

impl fmt::Display for RemittanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RemittanceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(value.trim().to_ascii_uppercase()))
            .map_err(|_| format!("unknown remittance status '{value}'"))
    }
}

/// Transformed submission package tracked through send/retry/cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remittance {
    pub id: RemittanceId,
    pub source_record_id: SourceRecordId,
    pub unit_id: UnitId,
    pub module: Module,
    pub competency: Competency,
    pub status: RemittanceStatus,
    pub payload: Value,
    pub protocol: Option<String>,
    pub error_msg: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRemittance {
    pub source_record_id: SourceRecordId,
    pub unit_id: UnitId,
    pub module: Module,
    pub competency: Competency,
    pub status: RemittanceStatus,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogDirection {
    Request,
    Response,
}

/// Append-only audit entry of one exchange with the oversight authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemittanceLog {
    pub id: RemittanceLogId,
    pub remittance_id: RemittanceId,
    pub direction: LogDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRemittanceLog {
    pub remittance_id: RemittanceId,
    pub direction: LogDirection,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Value,
    pub status_code: Option<u16>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitEnvironment {
    Producao,
    Homologacao,
}

/// Reporting unit and its credentials for the oversight authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub code: String,
    pub name: String,
    pub environment: UnitEnvironment,
    #[serde(skip_serializing)]
    pub production_token: Option<String>,
    #[serde(skip_serializing)]
    pub homologation_token: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointConfigId,
    pub module: Module,
    pub endpoint: String,
    pub method: String,
    pub description: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEndpointConfig {
    pub module: Module,
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Operator,
    Viewer,
}

/// Authenticated identity supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    View,
    Create,
    Edit,
    Delete,
    Transmit,
}

impl PermissionAction {
    pub const fn label(self) -> &'static str {
        match self {
            PermissionAction::View => "view",
            PermissionAction::Create => "create",
            PermissionAction::Edit => "edit",
            PermissionAction::Delete => "delete",
            PermissionAction::Transmit => "transmit",
        }
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability row scoped to an optional unit and optional module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissionGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub unit_id: Option<UnitId>,
    pub module: Option<Module>,
    pub can_view: bool,
    pub can_create: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_transmit: bool,
}

impl UserPermissionGrant {
    pub const fn allows(&self, action: PermissionAction) -> bool {
        match action {
            PermissionAction::View => self.can_view,
            PermissionAction::Create => self.can_create,
            PermissionAction::Edit => self.can_edit,
            PermissionAction::Delete => self.can_delete,
            PermissionAction::Transmit => self.can_transmit,
        }
    }

    pub fn scope(&self) -> (Option<UnitId>, Option<Module>) {
        (self.unit_id, self.module)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrant {
    pub user_id: UserId,
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    #[serde(default)]
    pub module: Option<Module>,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_create: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
    #[serde(default)]
    pub can_transmit: bool,
}

/// Partial update of a grant; `Some(None)` clears a scope component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantChanges {
    pub unit_id: Option<Option<UnitId>>,
    pub module: Option<Option<Module>>,
    pub can_view: Option<bool>,
    pub can_create: Option<bool>,
    pub can_edit: Option<bool>,
    pub can_delete: Option<bool>,
    pub can_transmit: Option<bool>,
}

impl GrantChanges {
    pub fn apply(&self, grant: &mut UserPermissionGrant) {
        if let Some(unit_id) = self.unit_id {
            grant.unit_id = unit_id;
        }
        if let Some(module) = self.module {
            grant.module = module;
        }
        if let Some(value) = self.can_view {
            grant.can_view = value;
        }
        if let Some(value) = self.can_create {
            grant.can_create = value;
        }
        if let Some(value) = self.can_edit {
            grant.can_edit = value;
        }
        if let Some(value) = self.can_delete {
            grant.can_delete = value;
        }
        if let Some(value) = self.can_transmit {
            grant.can_transmit = value;
        }
    }
}
