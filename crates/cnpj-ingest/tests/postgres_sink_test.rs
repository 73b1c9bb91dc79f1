//! PostgresSink against a live database.
//!
//! Needs `DATABASE_URL` pointing at a server where the test user may create
//! databases. Run with `cargo test -- --ignored`.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use cnpj_common::types::{EntityKind, Period};
use cnpj_ingest::sink::{PostgresSink, Sink};
use cnpj_ingest::transform::{transform, Record};
use sqlx::PgPool;

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn motivo(code: &str, description: &str) -> Record {
    transform(EntityKind::Motivo, row(&[code, description])).unwrap()
}

fn simples(basico: &str, opcao: &str) -> Record {
    transform(
        EntityKind::Simples,
        row(&[basico, opcao, "20070701", "00000000", "N", "00000000", "00000000"]),
    )
    .unwrap()
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_upsert_overwrites_by_natural_key(pool: PgPool) {
    let sink = PostgresSink::from_pool(pool.clone());

    let applied = sink
        .upsert_batch(EntityKind::Motivo, &[motivo("00", "SEM MOTIVO"), motivo("01", "EXTINCAO")])
        .await
        .unwrap();
    assert_eq!(applied, 2);

    sink.upsert_batch(EntityKind::Motivo, &[motivo("01", "EXTINCAO POR ENCERRAMENTO")])
        .await
        .unwrap();

    assert_eq!(count(&pool, "motivos").await, 2);
    let description: Option<String> = sqlx::query_scalar("SELECT descricao FROM motivos WHERE codigo = '01'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(description.as_deref(), Some("EXTINCAO POR ENCERRAMENTO"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_zero_dates_are_stored_as_null(pool: PgPool) {
    let sink = PostgresSink::from_pool(pool.clone());
    sink.upsert_batch(EntityKind::Simples, &[simples("11222333", "S")])
        .await
        .unwrap();

    let (opted, excluded): (Option<chrono::NaiveDate>, Option<chrono::NaiveDate>) = sqlx::query_as(
        "SELECT data_opcao_pelo_simples, data_exclusao_do_simples FROM dados_simples WHERE cnpj_basico = '11222333'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(opted, chrono::NaiveDate::from_ymd_opt(2007, 7, 1));
    assert_eq!(excluded, None);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_large_batch_spans_several_statements(pool: PgPool) {
    let sink = PostgresSink::from_pool(pool.clone());
    // Seven columns each: more rows than fit in one statement's bind limit.
    let records: Vec<Record> = (0..10_000)
        .map(|i| simples(&format!("{i:08}"), "N"))
        .collect();

    let applied = sink.upsert_batch(EntityKind::Simples, &records).await.unwrap();

    assert_eq!(applied, 10_000);
    assert_eq!(count(&pool, "dados_simples").await, 10_000);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_ledger_mark_check_and_reset(pool: PgPool) {
    let sink = PostgresSink::from_pool(pool);
    let march: Period = "2024-03".parse().unwrap();
    let april: Period = "2024-04".parse().unwrap();

    assert!(!sink.is_ledgered(march, "Cnaes.zip").await.unwrap());

    sink.mark_ledgered(march, "Cnaes.zip").await.unwrap();
    sink.mark_ledgered(march, "Cnaes.zip").await.unwrap();
    sink.mark_ledgered(april, "Cnaes.zip").await.unwrap();

    assert!(sink.is_ledgered(march, "Cnaes.zip").await.unwrap());
    assert!(!sink.is_ledgered(march, "Socios0.zip").await.unwrap());

    assert_eq!(sink.reset_ledger(Some(march)).await.unwrap(), 1);
    assert!(!sink.is_ledgered(march, "Cnaes.zip").await.unwrap());
    assert!(sink.is_ledgered(april, "Cnaes.zip").await.unwrap());

    assert_eq!(sink.reset_ledger(None).await.unwrap(), 1);
}
