use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{authorize, optional_text, required_text, DomainError, DomainResult};
use crate::access::{Action, Role, Scope, ShareGrant, Subject};
use crate::models::{Document, DocumentShare};
use crate::notify::{NotificationEvent, Notifier};
use crate::storage::ObjectStorage;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub display_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A document as one caller sees it; clients also get their share.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentEntry {
    #[serde(flatten)]
    pub document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<DocumentShare>,
}

#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub client_id: Uuid,
    pub can_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `Content-Disposition` value for `disposition` (`inline` or `attachment`).
pub fn content_disposition(disposition: &str, filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition, sanitized, encoded
    ))
}

fn storage_key(document_id: Uuid, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("documents/{document_id}/{safe}")
}

async fn client_scope(
    store: &dyn Store,
    subject: &Subject,
    document_id: Uuid,
    now: DateTime<Utc>,
) -> DomainResult<Scope> {
    let share = store.find_share(document_id, subject.user_id).await?;
    let grant = share.map(|share| ShareGrant {
        can_download: share.can_download,
        expires_at: share.expires_at,
    });
    Ok(Scope::new().at(now).share(grant))
}

async fn existing_document(store: &dyn Store, document_id: Uuid) -> DomainResult<Document> {
    store
        .find_document(document_id)
        .await?
        .ok_or(DomainError::NotFound("document"))
}

pub async fn list_documents(store: &dyn Store, subject: &Subject) -> DomainResult<Vec<DocumentEntry>> {
    if subject.role == Role::Client {
        let now = Utc::now();
        let shared = store.list_shared_documents(subject.user_id).await?;
        return Ok(shared
            .into_iter()
            .filter(|(_, share)| share.is_active_at(now))
            .map(|(document, share)| DocumentEntry {
                document,
                share: Some(share),
            })
            .collect());
    }

    authorize(subject, Action::ViewDocument, &Scope::new())?;
    Ok(store
        .list_documents()
        .await?
        .into_iter()
        .map(|document| DocumentEntry {
            document,
            share: None,
        })
        .collect())
}

pub async fn upload_document(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    subject: &Subject,
    upload: Upload,
) -> DomainResult<Document> {
    authorize(subject, Action::UploadDocument, &Scope::new())?;
    let filename = required_text(&upload.filename, "filename")?;
    if upload.bytes.is_empty() {
        return Err(DomainError::invalid("file must not be empty"));
    }

    let id = Uuid::new_v4();
    let key = storage_key(id, &filename);
    let file_type = upload
        .content_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string()
        });
    let size_bytes = upload.bytes.len() as i64;

    storage
        .put_object(
            &key,
            upload.bytes,
            Some(file_type.clone()),
            content_disposition("inline", &filename),
        )
        .await
        .map_err(DomainError::Storage)?;

    let document = Document {
        id,
        display_name: optional_text(upload.display_name).unwrap_or_else(|| filename.clone()),
        filename,
        file_type,
        storage_key: key,
        size_bytes,
        uploaded_by: subject.user_id,
        created_at: Utc::now(),
    };
    if let Err(err) = store.insert_document(document.clone()).await {
        if let Err(cleanup) = storage.delete_object(&document.storage_key).await {
            warn!(key = %document.storage_key, error = %cleanup, "failed to remove orphaned object");
        }
        return Err(err.into());
    }

    info!(document_id = %document.id, size_bytes, "document uploaded");
    Ok(document)
}

/// Staff read any document. Clients read through an active share, and the
/// first read stamps `viewed_at`.
pub async fn get_document(
    store: &dyn Store,
    subject: &Subject,
    document_id: Uuid,
) -> DomainResult<DocumentEntry> {
    if subject.role != Role::Client {
        authorize(subject, Action::ViewDocument, &Scope::new())?;
        return Ok(DocumentEntry {
            document: existing_document(store, document_id).await?,
            share: None,
        });
    }

    let now = Utc::now();
    let scope = client_scope(store, subject, document_id, now).await?;
    authorize(subject, Action::ViewSharedDocument, &scope)?;
    let share = store
        .stamp_share_viewed(document_id, subject.user_id, now)
        .await?;
    Ok(DocumentEntry {
        document: existing_document(store, document_id).await?,
        share,
    })
}

/// Checks a download and returns the document to link to. Client downloads
/// stamp `downloaded_at` the first time.
pub async fn authorize_download(
    store: &dyn Store,
    subject: &Subject,
    document_id: Uuid,
) -> DomainResult<Document> {
    if subject.role != Role::Client {
        authorize(subject, Action::ViewDocument, &Scope::new())?;
        return existing_document(store, document_id).await;
    }

    let now = Utc::now();
    let scope = client_scope(store, subject, document_id, now).await?;
    authorize(subject, Action::DownloadSharedDocument, &scope)?;
    store
        .stamp_share_downloaded(document_id, subject.user_id, now)
        .await?;
    existing_document(store, document_id).await
}

/// Re-checks a signed download link at redemption time, so a revoked share
/// stops working before the link expires.
pub async fn redeem_download(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
) -> DomainResult<Document> {
    let user = store
        .find_user(user_id)
        .await?
        .ok_or(DomainError::Unauthenticated)?;
    let subject = Subject {
        user_id: user.id,
        role: user.role,
    };

    if subject.role == Role::Client {
        let scope = client_scope(store, &subject, document_id, Utc::now()).await?;
        authorize(&subject, Action::DownloadSharedDocument, &scope)?;
    } else {
        authorize(&subject, Action::ViewDocument, &Scope::new())?;
    }
    existing_document(store, document_id).await
}

pub async fn delete_document(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    subject: &Subject,
    document_id: Uuid,
) -> DomainResult<()> {
    let document = store.find_document(document_id).await?;
    let mut scope = Scope::new();
    if let Some(document) = &document {
        scope = scope.owner(document.uploaded_by);
    }
    authorize(subject, Action::DeleteDocument, &scope)?;

    let document = document.ok_or(DomainError::NotFound("document"))?;
    if !store.delete_document(document.id).await? {
        return Err(DomainError::NotFound("document"));
    }
    if let Err(err) = storage.delete_object(&document.storage_key).await {
        warn!(document_id = %document.id, error = %err, "failed to delete stored object");
    }
    info!(%document_id, user_id = %subject.user_id, "document deleted");
    Ok(())
}

pub async fn list_shares(
    store: &dyn Store,
    subject: &Subject,
    document_id: Uuid,
) -> DomainResult<Vec<DocumentShare>> {
    authorize(subject, Action::ShareDocument, &Scope::new())?;
    existing_document(store, document_id).await?;
    Ok(store.list_shares(document_id).await?)
}

pub async fn share_document(
    store: &dyn Store,
    notifier: &Notifier,
    subject: &Subject,
    document_id: Uuid,
    request: ShareRequest,
) -> DomainResult<DocumentShare> {
    authorize(subject, Action::ShareDocument, &Scope::new())?;
    existing_document(store, document_id).await?;

    let client = store
        .find_user(request.client_id)
        .await?
        .ok_or(DomainError::NotFound("client"))?;
    if client.role != Role::Client {
        return Err(DomainError::invalid(
            "documents can only be shared with clients",
        ));
    }
    let now = Utc::now();
    if matches!(request.expires_at, Some(expires_at) if expires_at <= now) {
        return Err(DomainError::invalid("expires_at must be in the future"));
    }

    let share = store
        .upsert_share(DocumentShare {
            document_id,
            client_id: client.id,
            can_download: request.can_download,
            expires_at: request.expires_at,
            shared_by: subject.user_id,
            created_at: now,
            updated_at: now,
            viewed_at: None,
            downloaded_at: None,
        })
        .await?;

    info!(
        %document_id,
        client_id = %client.id,
        can_download = share.can_download,
        "document shared"
    );
    notifier.dispatch(NotificationEvent::DocumentShared {
        document_id,
        client_id: client.id,
        can_download: share.can_download,
        shared_by: subject.user_id,
    });
    Ok(share)
}

pub async fn revoke_share(
    store: &dyn Store,
    subject: &Subject,
    document_id: Uuid,
    client_id: Uuid,
) -> DomainResult<()> {
    authorize(subject, Action::RevokeShare, &Scope::new())?;
    if !store.delete_share(document_id, client_id).await? {
        return Err(DomainError::NotFound("share"));
    }
    info!(%document_id, %client_id, "document share revoked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::store::MemoryStore;

    async fn user(store: &MemoryStore, email: &str, role: Role) -> Subject {
        let user = store
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash: "x".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
            })
            .await
            .unwrap();
        Subject {
            user_id: user.id,
            role,
        }
    }

    async fn document(store: &MemoryStore, uploaded_by: Uuid) -> Document {
        let id = Uuid::new_v4();
        let document = Document {
            id,
            filename: "plan.pdf".to_string(),
            display_name: "plan.pdf".to_string(),
            file_type: "application/pdf".to_string(),
            storage_key: storage_key(id, "plan.pdf"),
            size_bytes: 10,
            uploaded_by,
            created_at: Utc::now(),
        };
        store.insert_document(document.clone()).await.unwrap();
        document
    }

    #[test]
    fn storage_keys_are_path_safe() {
        let id = Uuid::nil();
        assert_eq!(
            storage_key(id, "../site plan (v2).pdf"),
            format!("documents/{id}/.._site_plan__v2_.pdf")
        );
    }

    #[test]
    fn content_disposition_escapes_quotes() {
        let header = content_disposition("attachment", "a\"b.pdf").unwrap();
        assert!(header.starts_with("attachment; filename=\"a_b.pdf\""));
        assert!(content_disposition("inline", "").is_none());
    }

    #[tokio::test]
    async fn first_view_is_stamped_once() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        let staff = user(&store, "staff@example.com", Role::Employee).await;
        let client = user(&store, "client@example.com", Role::Client).await;
        let doc = document(&store, staff.user_id).await;

        share_document(
            &store,
            &notifier,
            &staff,
            doc.id,
            ShareRequest {
                client_id: client.user_id,
                can_download: false,
                expires_at: None,
            },
        )
        .await
        .unwrap();

        let first = get_document(&store, &client, doc.id).await.unwrap();
        let second = get_document(&store, &client, doc.id).await.unwrap();
        let first_seen = first.share.unwrap().viewed_at;
        assert!(first_seen.is_some());
        assert_eq!(second.share.unwrap().viewed_at, first_seen);
    }

    #[tokio::test]
    async fn reshare_keeps_first_touch_stamps() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        let staff = user(&store, "staff@example.com", Role::Worker).await;
        let client = user(&store, "client@example.com", Role::Client).await;
        let doc = document(&store, staff.user_id).await;
        let request = |can_download| ShareRequest {
            client_id: client.user_id,
            can_download,
            expires_at: None,
        };

        share_document(&store, &notifier, &staff, doc.id, request(true)).await.unwrap();
        authorize_download(&store, &client, doc.id).await.unwrap();
        let downloaded = store
            .find_share(doc.id, client.user_id)
            .await
            .unwrap()
            .unwrap()
            .downloaded_at;

        let updated = share_document(&store, &notifier, &staff, doc.id, request(false))
            .await
            .unwrap();
        assert!(!updated.can_download);
        assert_eq!(updated.downloaded_at, downloaded);
        assert!(matches!(
            authorize_download(&store, &client, doc.id).await,
            Err(DomainError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn revoked_or_foreign_documents_are_forbidden_to_clients() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        let staff = user(&store, "staff@example.com", Role::Admin).await;
        let client = user(&store, "client@example.com", Role::Client).await;
        let doc = document(&store, staff.user_id).await;

        assert!(matches!(
            get_document(&store, &client, doc.id).await,
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            get_document(&store, &client, Uuid::new_v4()).await,
            Err(DomainError::Forbidden)
        ));

        share_document(
            &store,
            &notifier,
            &staff,
            doc.id,
            ShareRequest {
                client_id: client.user_id,
                can_download: true,
                expires_at: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(list_documents(&store, &client).await.unwrap().len(), 1);

        revoke_share(&store, &staff, doc.id, client.user_id).await.unwrap();
        assert!(list_documents(&store, &client).await.unwrap().is_empty());
        assert!(matches!(
            redeem_download(&store, client.user_id, doc.id).await,
            Err(DomainError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn sharing_requires_a_client_recipient() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        let staff = user(&store, "staff@example.com", Role::Employee).await;
        let other = user(&store, "other@example.com", Role::Worker).await;
        let doc = document(&store, staff.user_id).await;

        let result = share_document(
            &store,
            &notifier,
            &staff,
            doc.id,
            ShareRequest {
                client_id: other.user_id,
                can_download: true,
                expires_at: None,
            },
        )
        .await;
        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn employees_delete_only_their_own_uploads() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner@example.com", Role::Employee).await;
        let other = user(&store, "other@example.com", Role::Employee).await;
        let doc = document(&store, owner.user_id).await;
        let storage = NullStorage;

        assert!(matches!(
            delete_document(&store, &storage, &other, doc.id).await,
            Err(DomainError::Forbidden)
        ));
        delete_document(&store, &storage, &owner, doc.id).await.unwrap();
        assert!(store.find_document(doc.id).await.unwrap().is_none());
    }

    struct NullStorage;

    #[async_trait::async_trait]
    impl ObjectStorage for NullStorage {
        async fn put_object(
            &self,
            _key: &str,
            _bytes: Vec<u8>,
            _content_type: Option<String>,
            _content_disposition: Option<String>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn presign_get_object(
            &self,
            key: &str,
            _expires_in: std::time::Duration,
            _content_disposition: Option<String>,
        ) -> anyhow::Result<String> {
            Ok(format!("https://null/{key}"))
        }

        async fn delete_object(&self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
