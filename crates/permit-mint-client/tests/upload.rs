mod common;

use common::{params_with, Event, MockLedger};
use permit_mint_client::{
    Keypair, LedgerError, LocalWallet, ProofUploadCoordinator, UploadError, UploadState,
};

fn proof(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn setup(max_attempts: u32) -> (permit_mint_client::MintParams, std::sync::Arc<MockLedger>, LocalWallet) {
    let params = params_with(|c| c.max_chunk_attempts = max_attempts);
    let ledger = MockLedger::new(params.clone(), [0; 32]);
    (params, ledger, LocalWallet::new(Keypair::generate()))
}

/// Checks the 944-byte artifact lands as [0,900) and [900,944), sent before any confirmation.
#[tokio::test]
async fn uploads_two_chunks_back_to_back() {
    let (params, ledger, wallet) = setup(3);
    let bytes = proof(944);
    let coordinator = ProofUploadCoordinator::new(&params, &*ledger, &wallet);
    let session = coordinator.upload(&bytes).await.unwrap();

    let ranges: Vec<_> = session.plan().unwrap().chunks().iter().map(|c| c.range()).collect();
    assert_eq!(ranges, vec![0..900, 900..944]);
    assert_eq!(ledger.account(&session.storage_address()).unwrap(), bytes);
    assert_eq!(session.state(), UploadState::Complete);
    assert_eq!(
        session.transitions(),
        &[
            UploadState::Idle,
            UploadState::StorageAllocated,
            UploadState::ChunksPlanned,
            UploadState::ChunksSubmitted,
            UploadState::ChunksConfirmed,
            UploadState::Complete,
        ]
    );
    assert_eq!(session.submissions(), 2);
    assert!(session.confirmed().iter().all(|c| *c));

    let events = ledger.events();
    let last_send = events.iter().rposition(|e| *e == Event::Send("write_chunk")).unwrap();
    let first_confirm = events.iter().position(|e| *e == Event::Confirm("write_chunk")).unwrap();
    assert!(last_send < first_confirm);
}

#[tokio::test]
async fn transient_send_failure_is_retried() {
    let (params, ledger, wallet) = setup(3);
    ledger.fail_sends("write_chunk", 1, LedgerError::Network("connection reset".into()));
    let bytes = proof(944);
    let session = ProofUploadCoordinator::new(&params, &*ledger, &wallet)
        .upload(&bytes)
        .await
        .unwrap();
    assert_eq!(session.submissions(), 3);
    assert_eq!(ledger.account(&session.storage_address()).unwrap(), bytes);
}

/// Checks that a chunk which landed but lost its confirmation is not sent again.
#[tokio::test]
async fn read_back_skips_durable_chunks() {
    let (params, ledger, wallet) = setup(3);
    ledger.fail_confirms("write_chunk", 1, LedgerError::Timeout("blockhash expired".into()));
    let bytes = proof(2500);
    let session = ProofUploadCoordinator::new(&params, &*ledger, &wallet)
        .upload(&bytes)
        .await
        .unwrap();
    assert_eq!(session.plan().unwrap().total_chunks(), 3);
    assert_eq!(session.submissions(), 3);
    assert_eq!(ledger.sends("write_chunk"), 3);
    assert!(ledger.events().contains(&Event::Read));
    assert_eq!(session.state(), UploadState::Complete);
}

/// Checks that a timed-out confirmation on the final attempt is settled by reading storage back.
#[tokio::test]
async fn last_attempt_timeout_is_settled_by_read_back() {
    let (params, ledger, wallet) = setup(1);
    ledger.fail_confirms("write_chunk", 2, LedgerError::Timeout("blockhash expired".into()));
    let bytes = proof(944);
    let session = ProofUploadCoordinator::new(&params, &*ledger, &wallet)
        .upload(&bytes)
        .await
        .unwrap();
    assert_eq!(session.state(), UploadState::Complete);
    assert_eq!(session.submissions(), 2);
    assert_eq!(ledger.sends("write_chunk"), 2);
    assert_eq!(ledger.events().last(), Some(&Event::Read));
    assert_eq!(ledger.account(&session.storage_address()).unwrap(), bytes);
}

#[tokio::test]
async fn exhausted_retries_fail_the_session() {
    let (params, ledger, wallet) = setup(3);
    ledger.fail_sends("write_chunk", 10, LedgerError::Network("rpc unavailable".into()));
    let coordinator = ProofUploadCoordinator::new(&params, &*ledger, &wallet);
    let bytes = proof(600);
    let mut session = coordinator.begin(bytes.len());
    let err = coordinator.run(&mut session, &bytes).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::ChunkExhausted { index: 0, attempts: 3, last: LedgerError::Network(_) }
    ));
    assert_eq!(ledger.sends("write_chunk"), 3);
    assert_eq!(session.state(), UploadState::Failed);
    assert_eq!(session.transitions().last(), Some(&UploadState::Failed));
}

#[tokio::test]
async fn allocation_failure_is_not_retried() {
    let (params, ledger, wallet) = setup(3);
    ledger.fail_sends("create_account", 1, LedgerError::Network("timeout".into()));
    let coordinator = ProofUploadCoordinator::new(&params, &*ledger, &wallet);
    let bytes = proof(944);
    let mut session = coordinator.begin(bytes.len());
    let err = coordinator.run(&mut session, &bytes).await.unwrap_err();
    assert!(matches!(err, UploadError::Allocation(_)));
    assert_eq!(ledger.sends("create_account"), 1);
    assert_eq!(ledger.sends("write_chunk"), 0);
    assert_eq!(session.transitions(), &[UploadState::Idle, UploadState::Failed]);
}

#[tokio::test]
async fn program_rejection_fails_fast() {
    let (params, ledger, wallet) = setup(5);
    ledger.fail_sends(
        "write_chunk",
        1,
        LedgerError::Rejected { message: "custom program error: 0x0".into(), logs: vec![] },
    );
    let err = ProofUploadCoordinator::new(&params, &*ledger, &wallet)
        .upload(&proof(944))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ChunkRejected { index: 0, .. }));
}

#[tokio::test]
async fn each_session_gets_its_own_storage() {
    let (params, ledger, wallet) = setup(3);
    let coordinator = ProofUploadCoordinator::new(&params, &*ledger, &wallet);
    let a = coordinator.upload(&proof(1000)).await.unwrap();
    let b = coordinator.upload(&proof(1000)).await.unwrap();
    assert_ne!(a.storage_address(), b.storage_address());
    assert_eq!(a.summary().total_chunks, 2);
}
