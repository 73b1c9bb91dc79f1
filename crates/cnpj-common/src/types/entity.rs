use serde::{Deserialize, Serialize};
use std::fmt;

/// Every record family published in a snapshot.
///
/// The first six are small code/description lookup tables; the last four are
/// the registry entities proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cnae,
    Motivo,
    Municipio,
    NaturezaJuridica,
    Pais,
    QualificacaoSocio,
    Empresa,
    Estabelecimento,
    Socio,
    Simples,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Cnae,
        EntityKind::Motivo,
        EntityKind::Municipio,
        EntityKind::NaturezaJuridica,
        EntityKind::Pais,
        EntityKind::QualificacaoSocio,
        EntityKind::Empresa,
        EntityKind::Estabelecimento,
        EntityKind::Socio,
        EntityKind::Simples,
    ];

    pub(crate) const UNRECOGNISED_RANK: u8 = 5;

    /// Destination table in the sink
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Cnae => "cnaes",
            EntityKind::Motivo => "motivos",
            EntityKind::Municipio => "municipios",
            EntityKind::NaturezaJuridica => "naturezas_juridicas",
            EntityKind::Pais => "paises",
            EntityKind::QualificacaoSocio => "qualificacoes_socios",
            EntityKind::Empresa => "empresas",
            EntityKind::Estabelecimento => "estabelecimentos",
            EntityKind::Socio => "socios",
            EntityKind::Simples => "dados_simples",
        }
    }

    pub fn load_rank(self) -> u8 {
        match self {
            EntityKind::Empresa => 1,
            EntityKind::Estabelecimento => 2,
            EntityKind::Socio => 3,
            EntityKind::Simples => 4,
            _ => 0,
        }
    }

    fn archive_prefix(self) -> &'static str {
        match self {
            EntityKind::Cnae => "cnaes",
            EntityKind::Motivo => "motivos",
            EntityKind::Municipio => "municipios",
            EntityKind::NaturezaJuridica => "naturezas",
            EntityKind::Pais => "paises",
            EntityKind::QualificacaoSocio => "qualificacoes",
            EntityKind::Empresa => "empresas",
            EntityKind::Estabelecimento => "estabelecimentos",
            EntityKind::Socio => "socios",
            EntityKind::Simples => "simples",
        }
    }

    fn member_marker(self) -> &'static str {
        match self {
            EntityKind::Cnae => "CNAECSV",
            EntityKind::Motivo => "MOTICSV",
            EntityKind::Municipio => "MUNICCSV",
            EntityKind::NaturezaJuridica => "NATJUCSV",
            EntityKind::Pais => "PAISCSV",
            EntityKind::QualificacaoSocio => "QUALSCSV",
            EntityKind::Empresa => "EMPRECSV",
            EntityKind::Estabelecimento => "ESTABELE",
            EntityKind::Socio => "SOCIOCSV",
            EntityKind::Simples => "SIMPLES",
        }
    }

    /// Detect the entity from a published archive name such as `Estabelecimentos3.zip`.
    pub fn from_archive_name(name: &str) -> Option<Self> {
        let base = name.rsplit('/').next().unwrap_or(name).to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| base.starts_with(kind.archive_prefix()))
    }

    /// Detect the entity from a member inside an archive, e.g.
    /// `K3241.K03200Y3.D40309.ESTABELE` or `F.K03200$W.SIMPLES.CSV.D40309`.
    pub fn from_member_name(name: &str) -> Option<Self> {
        let base = name.rsplit('/').next().unwrap_or(name).to_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| base.contains(kind.member_marker()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
