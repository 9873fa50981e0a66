use crate::infra::{default_rules, seeded_store, DEMO_OPERATOR, DEMO_UNIT};
use clap::Args;
use chrono::{Datelike, Utc};
use econect::compliance::{
    Competency, ComplianceError, ComplianceService, IdentityProvider, MockOutcome, MockTransport,
    Module, NewSourceRecord, RemittanceLog, StoreError, TransmissionAdapter,
};
use econect::error::AppError;
use serde_json::json;

const DEMO_BASE_URL: &str = "https://api.tce.ms.gov.br/esfinge";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Purchase value for the sample direct-purchase record
    #[arg(long, default_value_t = 25_000)]
    pub(crate) valor: u64,
    /// How the mock authority answers: accept, reject or unreachable
    #[arg(long, default_value = "accept", value_parser = parse_outcome)]
    pub(crate) outcome: MockOutcome,
}

fn parse_outcome(raw: &str) -> Result<MockOutcome, String> {
    raw.parse()
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { valor, outcome } = args;

    let store = seeded_store()?;
    let operator = store
        .principal(DEMO_OPERATOR)?
        .ok_or_else(|| StoreError::not_found("principal", DEMO_OPERATOR))?;
    let adapter = TransmissionAdapter::new(
        store.clone(),
        Box::new(MockTransport::new(outcome)),
        DEMO_BASE_URL,
    );
    let service = ComplianceService::new(store, adapter);
    service.install_rules(default_rules())?;

    let today = Utc::now();
    let competency = match Competency::new(today.year(), today.month()) {
        Ok(competency) => competency,
        Err(err) => {
            println!("Cannot derive the reporting period: {err}");
            return Ok(());
        }
    };

    println!("Compliance submission demo");
    println!("  Unit: UG001 (homologation), operator principal {DEMO_OPERATOR}");
    println!("  Mock authority outcome: {outcome:?}");

    let record = match service.records().ingest(
        &operator,
        NewSourceRecord {
            unit_id: DEMO_UNIT,
            module: Module::CompraDireta,
            competency,
            payload: json!({
                "valor": valor,
                "objeto": "Aquisicao de material de expediente",
                "fornecedor": { "cnpj": "12.345.678/0001-90", "nome": "Papelaria Central" }
            }),
        },
    ) {
        Ok(record) => record,
        Err(err) => return report_failure("ingestion", err),
    };
    println!(
        "\nIngested record {} ({}, competency {})",
        record.id, record.module, record.competency
    );

    match service.records().validate(&operator, record.id) {
        Ok(outcome) => {
            println!(
                "Validation: {} violation(s), {} blocking",
                outcome.summary.total, outcome.summary.blocking
            );
            for violation in &outcome.violations {
                println!(
                    "  - [{:?}] {} {} (observed '{}')",
                    violation.level, violation.code, violation.message, violation.value
                );
            }
        }
        Err(err) => return report_failure("validation", err),
    }

    let remittance = match service.remittances().create(&operator, record.id) {
        Ok(remittance) => remittance,
        Err(err) => return report_failure("remittance creation", err),
    };
    println!(
        "\nRemittance {} created with status {}",
        remittance.id, remittance.status
    );

    match service.remittances().send(&operator, remittance.id) {
        Ok(sent) => println!(
            "Transmission accepted: protocol {} in {} ms",
            sent.remittance.protocol.as_deref().unwrap_or("-"),
            sent.transmission.duration_ms
        ),
        Err(err) => {
            println!("Transmission failed: {err}");
            match service.remittances().retry(&operator, remittance.id) {
                Ok(retried) => println!(
                    "Remittance {} reset to {} for another attempt",
                    retried.id, retried.status
                ),
                Err(err) => println!("Retry unavailable: {err}"),
            }
        }
    }

    let logs = service.remittances().logs(&operator, remittance.id).unwrap_or_default();
    render_logs(&logs);
    Ok(())
}

fn report_failure(stage: &str, err: ComplianceError) -> Result<(), AppError> {
    println!("\nStopped at {stage}: {err}");
    if let ComplianceError::ValidationBlocked { violations } = &err {
        for violation in violations {
            println!("  - {} {}", violation.code, violation.message);
        }
    }
    Ok(())
}

fn render_logs(logs: &[RemittanceLog]) {
    if logs.is_empty() {
        return;
    }
    println!("\nTransmission log");
    for log in logs {
        let status = log
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:?} {} {} status={} duration={}ms",
            log.direction,
            log.method.as_deref().unwrap_or(""),
            log.url.as_deref().unwrap_or(""),
            status,
            log.duration_ms.unwrap_or_default()
        );
    }
}
