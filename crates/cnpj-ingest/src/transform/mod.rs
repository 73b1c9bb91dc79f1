//! Raw rows to typed records
//!
//! [`transform`] is pure: it sees one row of strings and the entity kind the
//! member was published as, and returns a typed [`Record`] or the reason the
//! row is unusable. Natural-key validation is the loader's job, not this one.

mod entities;
pub mod fields;

pub use entities::{Empresa, Estabelecimento, ReferenceCode, Simples, Socio, MISSING_PARTNER_DOCUMENT};

use crate::error::FieldParseError;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use cnpj_common::types::EntityKind;
use fields::Row;

/// A typed column value ready to bind
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Decimal(Option<BigDecimal>),
}

/// Column layout and conflict target of one sink table
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub key: &'static [&'static str],
}

impl TableSchema {
    pub fn for_kind(kind: EntityKind) -> Self {
        let (columns, key) = match kind {
            EntityKind::Empresa => (Empresa::COLUMNS, Empresa::KEY),
            EntityKind::Estabelecimento => (Estabelecimento::COLUMNS, Estabelecimento::KEY),
            EntityKind::Socio => (Socio::COLUMNS, Socio::KEY),
            EntityKind::Simples => (Simples::COLUMNS, Simples::KEY),
            _ => (ReferenceCode::COLUMNS, ReferenceCode::KEY),
        };

        Self {
            table: kind.table_name(),
            columns,
            key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Reference(EntityKind, ReferenceCode),
    Empresa(Empresa),
    Estabelecimento(Estabelecimento),
    Socio(Socio),
    Simples(Simples),
}

/// Natural key values in [`TableSchema::key`] order. `None` marks a missing part.
pub type NaturalKey<'a> = Vec<Option<&'a str>>;

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Reference(kind, _) => *kind,
            Record::Empresa(_) => EntityKind::Empresa,
            Record::Estabelecimento(_) => EntityKind::Estabelecimento,
            Record::Socio(_) => EntityKind::Socio,
            Record::Simples(_) => EntityKind::Simples,
        }
    }

    pub fn natural_key(&self) -> NaturalKey<'_> {
        match self {
            Record::Reference(_, r) => vec![r.codigo.as_deref()],
            Record::Empresa(e) => vec![e.cnpj_basico.as_deref()],
            Record::Estabelecimento(e) => vec![
                e.cnpj_basico.as_deref(),
                e.cnpj_ordem.as_deref(),
                e.cnpj_dv.as_deref(),
            ],
            Record::Socio(s) => vec![
                s.cnpj_basico.as_deref(),
                s.identificador_de_socio.as_deref(),
                s.cnpj_cpf_do_socio.as_deref(),
            ],
            Record::Simples(s) => vec![s.cnpj_basico.as_deref()],
        }
    }

    /// Column values in [`TableSchema::columns`] order
    pub fn values(&self) -> Vec<FieldValue> {
        match self {
            Record::Reference(_, r) => r.values(),
            Record::Empresa(e) => e.values(),
            Record::Estabelecimento(e) => e.values(),
            Record::Socio(s) => s.values(),
            Record::Simples(s) => s.values(),
        }
    }
}

/// Turn one raw row into a typed record of `kind`.
pub fn transform(kind: EntityKind, row: Vec<String>) -> Result<Record, FieldParseError> {
    let schema = TableSchema::for_kind(kind);
    let row = Row::new(row, schema.columns.len())?;

    let record = match kind {
        EntityKind::Empresa => Record::Empresa(Empresa::from_row(row)?),
        EntityKind::Estabelecimento => Record::Estabelecimento(Estabelecimento::from_row(row)?),
        EntityKind::Socio => Record::Socio(Socio::from_row(row)?),
        EntityKind::Simples => Record::Simples(Simples::from_row(row)?),
        reference => Record::Reference(reference, ReferenceCode::from_row(row)?),
    };

    Ok(record)
}
