//! Typed records, one struct per published layout

use super::fields::{zero_pad, Row};
use super::FieldValue;
use crate::error::FieldParseError;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

/// Placeholder stored when a partner's document number is absent, so the
/// composite key of `socios` never contains a null.
pub const MISSING_PARTNER_DOCUMENT: &str = "00000000000000";

/// A row of any of the six code/description lookup tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCode {
    pub codigo: Option<String>,
    pub descricao: Option<String>,
}

impl ReferenceCode {
    pub const KEY: &'static [&'static str] = &["codigo"];

    pub const COLUMNS: &'static [&'static str] = &["codigo", "descricao"];

    pub(crate) fn from_row(mut row: Row) -> Result<Self, FieldParseError> {
        Ok(Self {
            codigo: row.key(),
            descricao: row.text(),
        })
    }

    pub(crate) fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.codigo.clone()),
            FieldValue::Text(self.descricao.clone()),
        ]
    }
}

/// Company-level data keyed by the 8-digit base identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Empresa {
    pub cnpj_basico: Option<String>,
    pub razao_social: Option<String>,
    pub natureza_juridica: Option<String>,
    pub qualificacao_responsavel: Option<String>,
    pub capital_social: Option<BigDecimal>,
    pub porte: Option<String>,
    pub ente_federativo_responsavel: Option<String>,
}

impl Empresa {
    pub const KEY: &'static [&'static str] = &["cnpj_basico"];

    pub const COLUMNS: &'static [&'static str] = &[
        "cnpj_basico",
        "razao_social",
        "natureza_juridica",
        "qualificacao_responsavel",
        "capital_social",
        "porte",
        "ente_federativo_responsavel",
    ];

    pub(crate) fn from_row(mut row: Row) -> Result<Self, FieldParseError> {
        Ok(Self {
            cnpj_basico: row.key(),
            razao_social: row.text(),
            natureza_juridica: row.text(),
            qualificacao_responsavel: row.text(),
            capital_social: row.decimal("capital_social")?,
            porte: row.text(),
            ente_federativo_responsavel: row.text(),
        })
    }

    pub(crate) fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.cnpj_basico.clone()),
            FieldValue::Text(self.razao_social.clone()),
            FieldValue::Text(self.natureza_juridica.clone()),
            FieldValue::Text(self.qualificacao_responsavel.clone()),
            FieldValue::Decimal(self.capital_social.clone()),
            FieldValue::Text(self.porte.clone()),
            FieldValue::Text(self.ente_federativo_responsavel.clone()),
        ]
    }
}

/// One establishment (head office or branch) of a company.
///
/// `cnae_fiscal_secundaria` keeps the comma-joined code list as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estabelecimento {
    pub cnpj_basico: Option<String>,
    pub cnpj_ordem: Option<String>,
    pub cnpj_dv: Option<String>,
    pub identificador_matriz_filial: Option<String>,
    pub nome_fantasia: Option<String>,
    pub situacao_cadastral: Option<String>,
    pub data_situacao_cadastral: Option<NaiveDate>,
    pub motivo_situacao_cadastral: Option<String>,
    pub nome_cidade_exterior: Option<String>,
    pub pais: Option<String>,
    pub data_inicio_atividade: Option<NaiveDate>,
    pub cnae_fiscal_principal: Option<String>,
    pub cnae_fiscal_secundaria: Option<String>,
    pub tipo_logradouro: Option<String>,
    pub logradouro: Option<String>,
    pub numero: Option<String>,
    pub complemento: Option<String>,
    pub bairro: Option<String>,
    pub cep: Option<String>,
    pub uf: Option<String>,
    pub municipio: Option<String>,
    pub ddd_1: Option<String>,
    pub telefone_1: Option<String>,
    pub ddd_2: Option<String>,
    pub telefone_2: Option<String>,
    pub ddd_fax: Option<String>,
    pub fax: Option<String>,
    pub correio_eletronico: Option<String>,
    pub situacao_especial: Option<String>,
    pub data_situacao_especial: Option<NaiveDate>,
}

impl Estabelecimento {
    pub const KEY: &'static [&'static str] = &["cnpj_basico", "cnpj_ordem", "cnpj_dv"];

    pub const COLUMNS: &'static [&'static str] = &[
        "cnpj_basico",
        "cnpj_ordem",
        "cnpj_dv",
        "identificador_matriz_filial",
        "nome_fantasia",
        "situacao_cadastral",
        "data_situacao_cadastral",
        "motivo_situacao_cadastral",
        "nome_cidade_exterior",
        "pais",
        "data_inicio_atividade",
        "cnae_fiscal_principal",
        "cnae_fiscal_secundaria",
        "tipo_logradouro",
        "logradouro",
        "numero",
        "complemento",
        "bairro",
        "cep",
        "uf",
        "municipio",
        "ddd_1",
        "telefone_1",
        "ddd_2",
        "telefone_2",
        "ddd_fax",
        "fax",
        "correio_eletronico",
        "situacao_especial",
        "data_situacao_especial",
    ];

    pub(crate) fn from_row(mut row: Row) -> Result<Self, FieldParseError> {
        Ok(Self {
            cnpj_basico: row.key(),
            cnpj_ordem: row.key(),
            cnpj_dv: row.key(),
            identificador_matriz_filial: row.text(),
            nome_fantasia: row.text(),
            situacao_cadastral: row.text(),
            data_situacao_cadastral: row.date("data_situacao_cadastral")?,
            motivo_situacao_cadastral: row.text(),
            nome_cidade_exterior: row.text(),
            pais: zero_pad(row.text(), 3),
            data_inicio_atividade: row.date("data_inicio_atividade")?,
            cnae_fiscal_principal: row.text(),
            cnae_fiscal_secundaria: row.text(),
            tipo_logradouro: row.text(),
            logradouro: row.text(),
            numero: row.text(),
            complemento: row.text(),
            bairro: row.text(),
            cep: row.text(),
            uf: row.text(),
            municipio: row.text(),
            ddd_1: row.text(),
            telefone_1: row.text(),
            ddd_2: row.text(),
            telefone_2: row.text(),
            ddd_fax: row.text(),
            fax: row.text(),
            correio_eletronico: row.text(),
            situacao_especial: row.text(),
            data_situacao_especial: row.date("data_situacao_especial")?,
        })
    }

    pub(crate) fn values(&self) -> Vec<FieldValue> {
        use FieldValue::{Date, Text};
        vec![
            Text(self.cnpj_basico.clone()),
            Text(self.cnpj_ordem.clone()),
            Text(self.cnpj_dv.clone()),
            Text(self.identificador_matriz_filial.clone()),
            Text(self.nome_fantasia.clone()),
            Text(self.situacao_cadastral.clone()),
            Date(self.data_situacao_cadastral),
            Text(self.motivo_situacao_cadastral.clone()),
            Text(self.nome_cidade_exterior.clone()),
            Text(self.pais.clone()),
            Date(self.data_inicio_atividade),
            Text(self.cnae_fiscal_principal.clone()),
            Text(self.cnae_fiscal_secundaria.clone()),
            Text(self.tipo_logradouro.clone()),
            Text(self.logradouro.clone()),
            Text(self.numero.clone()),
            Text(self.complemento.clone()),
            Text(self.bairro.clone()),
            Text(self.cep.clone()),
            Text(self.uf.clone()),
            Text(self.municipio.clone()),
            Text(self.ddd_1.clone()),
            Text(self.telefone_1.clone()),
            Text(self.ddd_2.clone()),
            Text(self.telefone_2.clone()),
            Text(self.ddd_fax.clone()),
            Text(self.fax.clone()),
            Text(self.correio_eletronico.clone()),
            Text(self.situacao_especial.clone()),
            Date(self.data_situacao_especial),
        ]
    }
}

/// A partner of a company.
///
/// `cnpj_cpf_do_socio` arrives already masked for individuals
/// (e.g. `***123456**`) and is stored as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socio {
    pub cnpj_basico: Option<String>,
    pub identificador_de_socio: Option<String>,
    pub nome_socio: Option<String>,
    pub cnpj_cpf_do_socio: Option<String>,
    pub qualificacao_do_socio: Option<String>,
    pub data_entrada_sociedade: Option<NaiveDate>,
    pub pais: Option<String>,
    pub representante_legal: Option<String>,
    pub nome_do_representante: Option<String>,
    pub qualificacao_do_representante_legal: Option<String>,
    pub faixa_etaria: Option<String>,
}

impl Socio {
    pub const KEY: &'static [&'static str] = &["cnpj_basico", "identificador_de_socio", "cnpj_cpf_do_socio"];

    pub const COLUMNS: &'static [&'static str] = &[
        "cnpj_basico",
        "identificador_de_socio",
        "nome_socio",
        "cnpj_cpf_do_socio",
        "qualificacao_do_socio",
        "data_entrada_sociedade",
        "pais",
        "representante_legal",
        "nome_do_representante",
        "qualificacao_do_representante_legal",
        "faixa_etaria",
    ];

    pub(crate) fn from_row(mut row: Row) -> Result<Self, FieldParseError> {
        Ok(Self {
            cnpj_basico: row.key(),
            identificador_de_socio: row.key(),
            nome_socio: row.text(),
            cnpj_cpf_do_socio: row
                .key()
                .or_else(|| Some(MISSING_PARTNER_DOCUMENT.to_string())),
            qualificacao_do_socio: row.text(),
            data_entrada_sociedade: row.date("data_entrada_sociedade")?,
            pais: row.text(),
            representante_legal: row.text(),
            nome_do_representante: row.text(),
            qualificacao_do_representante_legal: row.text(),
            faixa_etaria: row.text(),
        })
    }

    pub(crate) fn values(&self) -> Vec<FieldValue> {
        use FieldValue::{Date, Text};
        vec![
            Text(self.cnpj_basico.clone()),
            Text(self.identificador_de_socio.clone()),
            Text(self.nome_socio.clone()),
            Text(self.cnpj_cpf_do_socio.clone()),
            Text(self.qualificacao_do_socio.clone()),
            Date(self.data_entrada_sociedade),
            Text(self.pais.clone()),
            Text(self.representante_legal.clone()),
            Text(self.nome_do_representante.clone()),
            Text(self.qualificacao_do_representante_legal.clone()),
            Text(self.faixa_etaria.clone()),
        ]
    }
}

/// Enrolment in the simplified tax regimes (Simples Nacional and MEI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simples {
    pub cnpj_basico: Option<String>,
    pub opcao_pelo_simples: Option<String>,
    pub data_opcao_pelo_simples: Option<NaiveDate>,
    pub data_exclusao_do_simples: Option<NaiveDate>,
    pub opcao_pelo_mei: Option<String>,
    pub data_opcao_pelo_mei: Option<NaiveDate>,
    pub data_exclusao_do_mei: Option<NaiveDate>,
}

impl Simples {
    pub const KEY: &'static [&'static str] = &["cnpj_basico"];

    pub const COLUMNS: &'static [&'static str] = &[
        "cnpj_basico",
        "opcao_pelo_simples",
        "data_opcao_pelo_simples",
        "data_exclusao_do_simples",
        "opcao_pelo_mei",
        "data_opcao_pelo_mei",
        "data_exclusao_do_mei",
    ];

    pub(crate) fn from_row(mut row: Row) -> Result<Self, FieldParseError> {
        Ok(Self {
            cnpj_basico: row.key(),
            opcao_pelo_simples: row.text(),
            data_opcao_pelo_simples: row.date("data_opcao_pelo_simples")?,
            data_exclusao_do_simples: row.date("data_exclusao_do_simples")?,
            opcao_pelo_mei: row.text(),
            data_opcao_pelo_mei: row.date("data_opcao_pelo_mei")?,
            data_exclusao_do_mei: row.date("data_exclusao_do_mei")?,
        })
    }

    pub(crate) fn values(&self) -> Vec<FieldValue> {
        use FieldValue::{Date, Text};
        vec![
            Text(self.cnpj_basico.clone()),
            Text(self.opcao_pelo_simples.clone()),
            Date(self.data_opcao_pelo_simples),
            Date(self.data_exclusao_do_simples),
            Text(self.opcao_pelo_mei.clone()),
            Date(self.data_opcao_pelo_mei),
            Date(self.data_exclusao_do_mei),
        ]
    }
}
