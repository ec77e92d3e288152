use std::time::Duration;

use alloy::primitives::{keccak256, B256};
use tracing::info;

mod utils;
use utils::{sequence, spin_up_member, spin_up_member_with};

use dac_node::{
    bls::verify_sequence_signature, sync::fetch_from_peers, ClientError, DataStore, ErrorCode,
    ErrorResponse, MemberClient, PeerClient, ServerConfig,
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_sign_then_serve() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    info!("Member listening on: {}", member.url);

    let seq = sequence(7, &[b"batch one", b"batch two"]);
    member.announce(&seq).await?;

    let client = MemberClient::new()?;
    let signature = client.sign_sequence(&member.url, &seq).await?;
    assert!(verify_sequence_signature(&signature, &member.pubkey, &seq));

    for batch in &seq.batches {
        assert!(member.store.exists(batch.key).await?);
        assert_eq!(client.get_offchain_data(&member.url, batch.key).await?, batch.value);
    }

    let status = client.status(&member.url).await?;
    assert_eq!(status.key_count, 2);
    assert_eq!(status.version, "test");

    Ok(())
}

#[tokio::test]
async fn test_invalid_data_is_rejected_and_not_stored() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    let mut seq = sequence(3, &[b"honest", b"tampered"]);
    seq.batches[1].value = b"something else".to_vec().into();
    member.announce(&seq).await?;

    let client = MemberClient::new()?;
    let err = client.sign_sequence(&member.url, &seq).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidData(_)), "{err:?}");

    assert_eq!(member.store.count_offchain_data().await?, 0);
    let err = client.get_offchain_data(&member.url, seq.batches[0].key).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound), "{err:?}");

    Ok(())
}

#[tokio::test]
async fn test_sequence_must_match_tracker() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    let client = MemberClient::new()?;

    // no update received yet
    let seq = sequence(1, &[b"early"]);
    let err = client.sign_sequence(&member.url, &seq).await.unwrap_err();
    assert!(matches!(err, ClientError::StaleView(_)), "{err:?}");
    assert!(err.is_retryable());

    member.announce(&sequence(1, &[b"sequenced"])).await?;
    let err = client.sign_sequence(&member.url, &seq).await.unwrap_err();
    assert!(matches!(err, ClientError::SequenceMismatch(_)), "{err:?}");
    assert!(!err.is_retryable());

    assert!(!member.store.exists(keccak256(b"early")).await?);

    Ok(())
}

#[tokio::test]
async fn test_http_error_mapping() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/v1/sign_sequence", member.url))
        .header("content-type", "application/json")
        .body("{\"batchNumber\": \"nope\"}")
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: ErrorResponse = response.json().await?;
    assert_eq!(body.error, ErrorCode::BadRequest);

    let response =
        http.get(format!("{}/api/v1/offchain_data/not-a-hash", member.url)).send().await?;
    assert_eq!(response.status(), 400);

    let response = http
        .get(format!("{}/api/v1/offchain_data/{}", member.url, B256::repeat_byte(1)))
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    let body: ErrorResponse = response.json().await?;
    assert_eq!(body.error, ErrorCode::NotFound);

    let response = http
        .post(format!("{}/api/v1/sign_sequence", member.url))
        .json(&sequence(9, &[]))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn test_body_limit() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let config =
        ServerConfig { port: 0, request_timeout: TIMEOUT, max_body_size: 16 * 1024 };
    let member = spin_up_member_with(config).await?;
    let client = MemberClient::new()?;

    // hex encoding doubles the payload on the wire
    let large = sequence(4, &[&[0x5a; 8 * 1024], &[0xa5; 8 * 1024]]);
    member.announce(&large).await?;
    let err = client.sign_sequence(&member.url, &large).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)), "{err:?}");
    assert_eq!(member.store.count_offchain_data().await?, 0);

    let small = sequence(5, &[&[0x5a; 1024]]);
    member.announce(&small).await?;
    client.sign_sequence(&member.url, &small).await?;

    Ok(())
}

#[tokio::test]
async fn test_large_sequence_under_default_limit() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    let client = MemberClient::new()?;

    let batches: Vec<&'static [u8]> =
        vec![&[1; 1024 * 1024], &[2; 1024 * 1024], &[3; 1024 * 1024], &[4; 1024 * 1024]];
    let seq = sequence(6, &batches);
    member.announce(&seq).await?;

    let signature = client.sign_sequence(&member.url, &seq).await?;
    assert!(verify_sequence_signature(&signature, &member.pubkey, &seq));
    assert_eq!(member.store.count_offchain_data().await?, 4);

    Ok(())
}

#[tokio::test]
async fn test_fetch_from_peers_skips_unreachable() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let member = spin_up_member(TIMEOUT).await?;
    let seq = sequence(2, &[b"replicated"]);
    member.announce(&seq).await?;

    let client = MemberClient::with_timeout(Duration::from_secs(1))?;
    client.sign_sequence(&member.url, &seq).await?;

    let peers = vec!["http://127.0.0.1:1".to_owned(), member.url.clone()];
    let data = fetch_from_peers(&client, &peers, seq.batches[0].key).await;
    assert_eq!(data.as_ref(), Some(&seq.batches[0]));

    let missing = fetch_from_peers(&client, &peers, B256::repeat_byte(2)).await;
    assert!(missing.is_none());

    Ok(())
}

#[tokio::test]
async fn test_server_stops_on_cancel() -> eyre::Result<()> {
    let member = spin_up_member(TIMEOUT).await?;
    let client = MemberClient::with_timeout(Duration::from_secs(1))?;
    client.status(&member.url).await?;

    member.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fresh = MemberClient::with_timeout(Duration::from_secs(1))?;
    let err = fresh.status(&member.url).await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)), "{err:?}");

    Ok(())
}
