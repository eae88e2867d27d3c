//! In-memory repository for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{RepoResult, Repository, RepositoryError};
use crate::models::{Document, DocumentStatus, Extraction};

#[derive(Default)]
struct State {
    documents: BTreeMap<i64, Document>,
    extractions: BTreeMap<i64, Extraction>,
    next_document_id: i64,
    next_extraction_id: i64,
}

/// Map-backed repository. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<Utc>, i64)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_document(&self, mut document: Document) -> RepoResult<Document> {
        let mut state = self.state.write().await;
        state.next_document_id += 1;
        document.id = state.next_document_id;
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: i64) -> RepoResult<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self) -> RepoResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.state.read().await.documents.values().cloned().collect();
        newest_first(&mut docs, |d| (d.created_at, d.id));
        Ok(docs)
    }

    async fn update_document(&self, document: &Document) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.documents.get_mut(&document.id) {
            Some(slot) => {
                *slot = document.clone();
                Ok(())
            }
            None => Err(RepositoryError::DocumentNotFound(document.id)),
        }
    }

    async fn delete_document(&self, id: i64) -> RepoResult<Option<Document>> {
        let mut state = self.state.write().await;
        let removed = state.documents.remove(&id);
        if removed.is_some() {
            state.extractions.retain(|_, e| e.document_id != id);
        }
        Ok(removed)
    }

    async fn next_document_after(&self, id: i64) -> RepoResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .range(id.saturating_add(1)..)
            .next()
            .map(|(_, d)| d.clone()))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(DocumentStatus, u64)>> {
        let state = self.state.read().await;
        Ok(DocumentStatus::ALL
            .iter()
            .map(|status| {
                let count = state
                    .documents
                    .values()
                    .filter(|d| d.status == *status)
                    .count() as u64;
                (*status, count)
            })
            .collect())
    }

    async fn count_documents_with_storage_path(&self, storage_path: &str) -> RepoResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .values()
            .filter(|d| d.storage_path == storage_path)
            .count() as u64)
    }

    async fn save_extraction(&self, mut extraction: Extraction) -> RepoResult<Extraction> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(&extraction.document_id) {
            return Err(RepositoryError::DocumentNotFound(extraction.document_id));
        }
        extraction.updated_at = Utc::now();

        let existing = state
            .extractions
            .values()
            .find(|e| e.document_id == extraction.document_id)
            .map(|e| (e.id, e.created_at));
        match existing {
            Some((id, created_at)) => {
                extraction.id = id;
                extraction.created_at = created_at;
            }
            None => {
                state.next_extraction_id += 1;
                extraction.id = state.next_extraction_id;
            }
        }

        state.extractions.insert(extraction.id, extraction.clone());
        Ok(extraction)
    }

    async fn get_extraction(&self, id: i64) -> RepoResult<Option<Extraction>> {
        Ok(self.state.read().await.extractions.get(&id).cloned())
    }

    async fn get_extraction_for_document(
        &self,
        document_id: i64,
    ) -> RepoResult<Option<Extraction>> {
        Ok(self
            .state
            .read()
            .await
            .extractions
            .values()
            .find(|e| e.document_id == document_id)
            .cloned())
    }

    async fn list_extractions(&self) -> RepoResult<Vec<Extraction>> {
        let mut items: Vec<Extraction> =
            self.state.read().await.extractions.values().cloned().collect();
        newest_first(&mut items, |e| (e.created_at, e.id));
        Ok(items)
    }

    async fn update_extraction(&self, extraction: &Extraction) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.extractions.get_mut(&extraction.id) {
            Some(slot) => {
                *slot = extraction.clone();
                Ok(())
            }
            None => Err(RepositoryError::ExtractionNotFound(extraction.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> Document {
        Document::new(
            name.to_string(),
            10,
            "image/png".to_string(),
            format!("ab/{}", name),
            "abcdef0123456789".to_string(),
        )
    }

    #[tokio::test]
    async fn test_ids_are_assigned_in_order() {
        let repo = MemoryRepository::new();
        let a = repo.create_document(doc("a.png")).await.unwrap();
        let b = repo.create_document(doc("b.png")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let listed = repo.list_documents().await.unwrap();
        assert_eq!(listed[0].id, b.id);

        assert_eq!(repo.next_document_after(a.id).await.unwrap().unwrap().id, b.id);
        assert!(repo.next_document_after(b.id).await.unwrap().is_none());
        assert_eq!(repo.next_document_after(0).await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_one_extraction_per_document() {
        let repo = MemoryRepository::new();
        let d = repo.create_document(doc("a.png")).await.unwrap();

        let first = repo.save_extraction(Extraction::new(d.id)).await.unwrap();
        let mut replacement = Extraction::new(d.id);
        replacement.invoice_number = Some("INV-2".to_string());
        let second = repo.save_extraction(replacement).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(repo.list_extractions().await.unwrap().len(), 1);
        assert_eq!(
            repo.get_extraction(first.id)
                .await
                .unwrap()
                .unwrap()
                .invoice_number
                .as_deref(),
            Some("INV-2")
        );
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let repo = MemoryRepository::new();
        let d = repo.create_document(doc("a.png")).await.unwrap();
        let e = repo.save_extraction(Extraction::new(d.id)).await.unwrap();

        assert!(repo.delete_document(d.id).await.unwrap().is_some());
        assert!(repo.get_extraction(e.id).await.unwrap().is_none());
        assert!(repo.get_extraction_for_document(d.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_extraction_for_deleted_document() {
        let repo = MemoryRepository::new();
        let d = repo.create_document(doc("a.png")).await.unwrap();
        repo.delete_document(d.id).await.unwrap();

        assert!(matches!(
            repo.save_extraction(Extraction::new(d.id)).await,
            Err(RepositoryError::DocumentNotFound(id)) if id == d.id
        ));
        assert!(repo.list_extractions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_documents_with_storage_path() {
        let repo = MemoryRepository::new();
        let a = repo.create_document(doc("a.png")).await.unwrap();
        let mut twin = doc("copy.png");
        twin.storage_path = a.storage_path.clone();
        repo.create_document(twin).await.unwrap();
        repo.create_document(doc("b.png")).await.unwrap();

        assert_eq!(repo.count_documents_with_storage_path(&a.storage_path).await.unwrap(), 2);
        assert_eq!(repo.count_documents_with_storage_path("zz/none").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let repo = MemoryRepository::new();
        let mut e = Extraction::new(1);
        e.id = 5;
        assert!(matches!(
            repo.update_extraction(&e).await,
            Err(RepositoryError::ExtractionNotFound(5))
        ));
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let repo = MemoryRepository::new();
        let mut d = repo.create_document(doc("a.png")).await.unwrap();
        repo.create_document(doc("b.png")).await.unwrap();
        d.transition_to(DocumentStatus::Processing).unwrap();
        repo.update_document(&d).await.unwrap();

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(
            counts,
            vec![
                (DocumentStatus::Uploaded, 1),
                (DocumentStatus::Processing, 1),
                (DocumentStatus::Completed, 0),
                (DocumentStatus::Error, 0),
            ]
        );
    }
}
