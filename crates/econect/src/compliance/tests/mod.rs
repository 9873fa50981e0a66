mod common;
mod remittance;
