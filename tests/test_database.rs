mod common;
use common::*;

use mimamori::database::Database;
use mimamori::normalizer::NormalizedReading;
use mimamori::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn reading(temperature: f64, humidness: f64) -> NormalizedReading {
    NormalizedReading::from(vec![
        ("temperature", temperature),
        ("humidness", humidness),
        ("EC_conductivity", 120.0),
        ("PH", 6.5),
    ])
}

#[tokio::test]
async fn ensure_schema_is_idempotent() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let database = Factory::database(&dir, Factory::channel_map(), Factory::clock());

    database.ensure_schema().await?;
    let first = database.columns().await?;
    database.ensure_schema().await?;
    let second = database.columns().await?;

    assert_eq!(first, vec!["timestamp", "temperature", "humidness", "EC_conductivity", "PH"]);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn ensure_schema_survives_restart_and_adds_new_channels() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let clock = Factory::clock();

    let database = Factory::database(&dir, Factory::channel_map(), clock.clone());
    database.ensure_schema().await?;
    database.append(&reading(25.0, 50.0)).await?;
    database.close().await;

    let mut channels: Vec<_> = Factory::channel_map().iter().cloned().collect();
    channels.push(ChannelDefinition::new(4, "Nitrogen", 1.0));
    let grown = Arc::new(ChannelMap::new(channels)?);

    let database = Factory::database(&dir, grown, clock);
    database.ensure_schema().await?;
    database.ensure_schema().await?;

    assert_eq!(
        database.columns().await?,
        vec!["timestamp", "temperature", "humidness", "EC_conductivity", "PH", "Nitrogen"]
    );
    let records = database.records().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("temperature"), Some(25.0));
    assert_eq!(records[0].get("Nitrogen"), None);
    Ok(())
}

#[tokio::test]
async fn distinct_timestamps_make_distinct_rows() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let clock = Factory::clock();
    let database = Factory::database(&dir, Factory::channel_map(), clock.clone());
    database.ensure_schema().await?;

    let first = database.append(&reading(25.0, 50.0)).await?;
    clock.advance(Duration::from_secs(15 * 60));
    let second = database.append(&reading(26.5, 48.0)).await?;

    assert_eq!(first, "2024-05-01 09:30:00");
    assert_eq!(second, "2024-05-01 09:45:00");

    let records = database.records().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp, first);
    assert_eq!(records[1].timestamp, second);
    assert_eq!(records[1].get("temperature"), Some(26.5));
    assert_eq!(records[1].get("PH"), Some(6.5));
    Ok(())
}

#[tokio::test]
async fn timestamp_collision_fails_and_leaves_prior_rows_alone() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let clock = Factory::clock();
    let database = Factory::database(&dir, Factory::channel_map(), clock.clone());
    database.ensure_schema().await?;

    database.append(&reading(25.0, 50.0)).await?;
    clock.advance(Duration::from_secs(1));
    database.append(&reading(26.0, 51.0)).await?;
    let before = database.records().await?;

    let err = database
        .insert("2024-05-01 09:30:00", &reading(99.0, 99.0))
        .await
        .unwrap_err();

    assert!(matches!(err, PersistFailure::Database(_)), "unexpected {:?}", err);
    assert_eq!(database.count().await?, 2);
    assert_eq!(database.records().await?, before);
    Ok(())
}

#[tokio::test]
async fn append_within_same_second_is_rejected() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let database = Factory::database(&dir, Factory::channel_map(), Factory::clock());

    database.append(&reading(25.0, 50.0)).await?;
    assert!(database.append(&reading(25.0, 50.0)).await.is_err());

    assert_eq!(database.count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn partial_reading_leaves_missing_columns_empty() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let database = Factory::database(&dir, Factory::channel_map(), Factory::clock());

    database
        .append(&NormalizedReading::from(vec![("PH", 7.0)]))
        .await?;

    let records = database.records().await?;
    assert_eq!(records[0].get("PH"), Some(7.0));
    assert_eq!(records[0].get("temperature"), None);
    Ok(())
}

#[tokio::test]
async fn creates_store_in_fresh_location() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fresh.db");
    let database = Database::new(path.to_str().unwrap(), Factory::channel_map(), Factory::clock());

    database.ensure_schema().await?;

    assert!(path.exists());
    assert_eq!(database.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn records_follow_channel_names_after_case_only_rename() -> Result<()> {
    common_setup();
    let dir = tempfile::tempdir()?;
    let clock = Factory::clock();

    let lower = Arc::new(ChannelMap::new(vec![ChannelDefinition::new(3, "ph", 10.0)])?);
    let database = Factory::database(&dir, lower, clock.clone());
    database.append(&NormalizedReading::from(vec![("ph", 6.5)])).await?;
    database.close().await;

    clock.advance(Duration::from_secs(1));
    let upper = Arc::new(ChannelMap::new(vec![ChannelDefinition::new(3, "PH", 10.0)])?);
    let database = Factory::database(&dir, upper, clock);
    database.ensure_schema().await?;
    database.append(&NormalizedReading::from(vec![("PH", 7.0)])).await?;

    assert_eq!(database.columns().await?, vec!["timestamp", "ph"]);
    let records = database.records().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("PH"), Some(6.5));
    assert_eq!(records[1].get("PH"), Some(7.0));
    Ok(())
}
