//! In-process ledger client over a record book

use super::book::RecordBook;
use super::identity::{Identity, UnsignedSubmission};
use super::{
    settle, CommitReceipt, FileRecord, LedgerClient, LedgerError, LedgerResult, Owner,
    RecordId, RecordPointer,
};
use crate::storage::ContentAddress;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Ledger client that signs and applies submissions directly to a
/// [`RecordBook`] in the same process
pub struct LocalLedger {
    book: Arc<RecordBook>,
    identity: Arc<Identity>,
    /// Keeps nonce lookup and submission together for this identity
    submit_lock: Arc<Mutex<()>>,
}

impl LocalLedger {
    pub fn new(book: Arc<RecordBook>, identity: Identity) -> Self {
        Self {
            book,
            identity: Arc::new(identity),
            submit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn book(&self) -> &Arc<RecordBook> {
        &self.book
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    fn owner(&self) -> Owner {
        self.identity.owner()
    }

    async fn commit(&self, pointer: RecordPointer) -> LedgerResult<CommitReceipt> {
        let book = self.book.clone();
        let identity = self.identity.clone();
        let submit_lock = self.submit_lock.clone();

        // Submission flushes sled, keep it off the runtime threads
        let receipt = tokio::task::spawn_blocking(move || -> LedgerResult<_> {
            let owner = identity.owner();
            let tx_hash = {
                let _guard = submit_lock.lock();
                let nonce = book.nonce(&owner)?;
                let submission = identity
                    .sign(UnsignedSubmission {
                        record_store: book.record_store().to_string(),
                        owner,
                        nonce,
                        pointer,
                    })
                    .map_err(|e| LedgerError::Rejected {
                        reason: e.to_string(),
                        retryable: false,
                    })?;
                book.submit(&submission)?
            };
            book.receipt(&tx_hash)?
                .ok_or_else(|| LedgerError::Unavailable(format!("no receipt for {}", tx_hash)))
        })
        .await
        .map_err(|e| LedgerError::Unavailable(format!("submission task failed: {}", e)))??;

        settle(&receipt)
    }

    async fn get(&self, id: RecordId) -> LedgerResult<FileRecord> {
        self.book
            .record(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("record {}", id)))
    }

    async fn list_by_owner(&self, owner: &Owner) -> LedgerResult<Vec<RecordId>> {
        Ok(self.book.records_by_owner(owner)?)
    }

    async fn find_by_content_address(
        &self,
        address: &ContentAddress,
    ) -> LedgerResult<Option<RecordId>> {
        Ok(self.book.find_by_content(address)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> LocalLedger {
        let book = Arc::new(RecordBook::temporary("filehub").unwrap());
        LocalLedger::new(book, Identity::generate())
    }

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let ledger = ledger();
        let address = ContentAddress::parse("QmFile").unwrap();
        let pointer = RecordPointer::Metadata {
            uri: "ipfs://QmMeta".to_string(),
            content_address: Some(address.clone()),
        };

        let committed = ledger.commit(pointer.clone()).await.unwrap();
        assert_eq!(committed.record_id, RecordId(1));

        let record = ledger.get(committed.record_id).await.unwrap();
        assert_eq!(record.pointer, pointer);
        assert_eq!(record.owner, ledger.owner());
        assert_eq!(
            ledger.find_by_content_address(&address).await.unwrap(),
            Some(RecordId(1))
        );
        assert_eq!(
            ledger.list_by_owner(&ledger.owner()).await.unwrap(),
            vec![RecordId(1)]
        );
    }

    #[tokio::test]
    async fn test_missing_record() {
        let ledger = ledger();
        assert!(matches!(
            ledger.get(RecordId(7)).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reverted_commit() {
        let ledger = ledger();
        let result = ledger
            .commit(RecordPointer::Direct {
                file_name: " ".to_string(),
                content_address: ContentAddress::parse("QmFile").unwrap(),
            })
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected {
                retryable: false,
                ..
            })
        ));

        // The reverted submission consumed nonce 0; the next commit still lands
        let next = ledger
            .commit(RecordPointer::Direct {
                file_name: "a.txt".to_string(),
                content_address: ContentAddress::parse("QmFile").unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(next.record_id, RecordId(1));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_commit_leaves_runtime_thread_free() {
        let ledger = Arc::new(ledger());
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..4 {
            let committed = ledger
                .commit(RecordPointer::Direct {
                    file_name: format!("f{}.txt", i),
                    content_address: ContentAddress::parse(format!("Qm{}", i)).unwrap(),
                })
                .await
                .unwrap();
            assert_eq!(committed.record_id, RecordId(i + 1));
        }
        ticker.abort();

        // On a single-threaded runtime the ticker only runs while commits wait
        // on the blocking pool
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_concurrent_commits_get_distinct_ids() {
        let ledger = Arc::new(ledger());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .commit(RecordPointer::Direct {
                            file_name: format!("f{}.txt", i),
                            content_address: ContentAddress::parse(format!("Qm{}", i)).unwrap(),
                        })
                        .await
                        .unwrap()
                        .record_id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (1..=8).map(RecordId).collect::<Vec<_>>());
    }
}
