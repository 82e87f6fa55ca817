//! The facade the UI layer talks to.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tracing::info;

use tandem_remote::{BlobStorage, FsBlobStore, RemoteStore, Subscription};
use tandem_shared::constants::APP_NAME;
use tandem_shared::keys;
use tandem_shared::{
    ChatSummary, ConversationId, KeyError, Message, SharedClock, SystemClock, UserId,
};
use tandem_store::{CacheService, Database, LocalStorage};

use crate::balance::BalanceService;
use crate::config::ClientConfig;
use crate::error::{ClientError, SendError};
use crate::keys::{KeyManager, KeySession, KeyStatus};
use crate::layout;
use crate::pipeline::{MessagePipeline, SendOutcome, SendRequest};
use crate::profile::{Profile, ProfileService};
use crate::receipts::ReadReceipts;
use crate::sync::SyncEngine;

struct Session {
    user: UserId,
    keys: KeySession,
}

pub struct ChatClient {
    remote: Arc<dyn RemoteStore>,
    sync: SyncEngine,
    pipeline: MessagePipeline,
    receipts: ReadReceipts,
    keys: KeyManager,
    profiles: ProfileService,
    balances: BalanceService,
    session: RwLock<Option<Session>>,
}

impl ChatClient {
    /// Wire a client from its collaborators. One client (and so one cache)
    /// per process.
    pub fn new(
        config: &ClientConfig,
        remote: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStorage>,
        storage: Arc<dyn LocalStorage>,
        clock: SharedClock,
    ) -> Self {
        let cache = Arc::new(CacheService::new(storage.clone(), clock.clone()));
        let balances = BalanceService::new(remote.clone(), cache.clone());

        Self {
            sync: SyncEngine::new(remote.clone(), cache.clone(), config.recent_conversations),
            pipeline: MessagePipeline::new(
                remote.clone(),
                blobs,
                balances.clone(),
                clock.clone(),
                config.max_image_bytes,
            ),
            receipts: ReadReceipts::new(
                remote.clone(),
                clock,
                config.recent_conversations,
                config.unread_window_ms(),
                config.unread_recount,
            ),
            keys: KeyManager::new(storage, remote.clone()),
            profiles: ProfileService::new(remote.clone(), cache),
            balances,
            remote,
            session: RwLock::new(None),
        }
    }

    /// Client backed by the SQLite cache and filesystem blob store named in
    /// `config`.
    pub async fn open(
        config: &ClientConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, ClientError> {
        crate::init_tracing();
        info!(app = APP_NAME, db = ?config.db_path, "Opening chat client");
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let blobs = FsBlobStore::new(
            config.blob_path.clone(),
            config.blob_base_url.clone(),
            config.max_image_bytes,
        )
        .await?;

        Ok(Self::new(
            config,
            remote,
            Arc::new(blobs),
            Arc::new(Mutex::new(db)),
            Arc::new(SystemClock),
        ))
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Start a session for `user` and run the keypair lifecycle. Key
    /// publication problems are logged, never returned.
    pub async fn login(&self, user: UserId) -> Result<KeyStatus, ClientError> {
        let keys = self.keys.ensure_keypair(&user).await?;
        let status = keys.status;
        info!(user = %user, ?status, "Logged in");
        *self.session.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Session { user, keys });
        Ok(status)
    }

    pub fn logout(&self) {
        if let Some(session) = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            info!(user = %session.user, "Logged out");
        }
    }

    pub fn current_user(&self) -> Result<UserId, ClientError> {
        self.with_session(|s| s.user.clone())
    }

    pub fn key_fingerprint(&self) -> Result<String, ClientError> {
        self.with_session(|s| s.keys.keypair.fingerprint())
    }

    pub fn conversation_id(&self, other: &UserId) -> Result<ConversationId, ClientError> {
        Ok(ConversationId::derive(&self.current_user()?, other)?)
    }

    // -----------------------------------------------------------------------
    // Live feeds
    // -----------------------------------------------------------------------

    pub async fn conversations(&self) -> Result<Subscription<Vec<ChatSummary>>, ClientError> {
        self.sync
            .subscribe_conversation_list(&self.current_user()?)
            .await
    }

    pub async fn messages(&self, other: &UserId) -> Result<Subscription<Vec<Message>>, ClientError> {
        self.sync.subscribe_messages(&self.conversation_id(other)?).await
    }

    pub async fn unread_count(&self) -> Result<Subscription<u32>, ClientError> {
        self.receipts.unread_count(&self.current_user()?).await
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    pub async fn send_text(
        &self,
        other: &UserId,
        text: impl Into<String>,
    ) -> Result<SendOutcome, SendError> {
        let me = self.current_user().map_err(|_| SendError::NotLoggedIn)?;
        self.pipeline
            .send(SendRequest::text(me, other.clone(), text))
            .await
    }

    pub async fn send_image(
        &self,
        other: &UserId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<SendOutcome, SendError> {
        let me = self.current_user().map_err(|_| SendError::NotLoggedIn)?;
        self.pipeline
            .send(SendRequest::image(me, other.clone(), file_name, bytes))
            .await
    }

    /// Send a prepared request, e.g. a retry carrying the original
    /// idempotency key. The request must come from the logged-in user.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, SendError> {
        match self.current_user() {
            Ok(me) if me == request.sender => self.pipeline.send(request).await,
            _ => Err(SendError::NotLoggedIn),
        }
    }

    pub async fn mark_as_read(&self, other: &UserId, loaded: &[Message]) -> Result<usize, ClientError> {
        let me = self.current_user()?;
        let conversation = ConversationId::derive(&me, other)?;
        self.receipts.mark_as_read(&conversation, &me, loaded).await
    }

    pub async fn purge_conversation(&self, other: &UserId) -> Result<ConversationId, ClientError> {
        self.sync
            .purge_conversation(&self.current_user()?, other)
            .await
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Fresh balance from the remote counter.
    pub async fn balance(&self) -> Result<i64, ClientError> {
        Ok(self.balances.refresh(&self.current_user()?).await?)
    }

    pub async fn unread_total(&self) -> Result<u32, ClientError> {
        self.receipts.unread_count_once(&self.current_user()?).await
    }

    pub async fn profile(&self, user: &UserId) -> Result<Option<Profile>, ClientError> {
        self.profiles.profile(user).await
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    // -----------------------------------------------------------------------
    // Encryption helpers (not used by the send path)
    // -----------------------------------------------------------------------

    /// Encrypt `plaintext` to `recipient`'s published public key.
    pub async fn encrypt_for(&self, recipient: &UserId, plaintext: &str) -> Result<String, ClientError> {
        let pem = match self.remote.get(&layout::public_key(recipient)).await? {
            Some(Value::String(pem)) => pem,
            _ => {
                return Err(KeyError::Import(format!("{recipient} has no published public key")).into())
            }
        };
        let key = keys::import_public_key(&pem)?;
        let plaintext = plaintext.to_string();
        let ciphertext = tokio::task::spawn_blocking(move || keys::encrypt(&plaintext, &key))
            .await
            .map_err(|e| KeyError::Encryption(e.to_string()))??;
        Ok(ciphertext)
    }

    /// Decrypt a payload addressed to the logged-in user.
    pub async fn decrypt(&self, ciphertext: &str) -> Result<String, ClientError> {
        let key = self.with_session(|s| s.keys.keypair.private_key().clone())?;
        let ciphertext = ciphertext.to_string();
        let plaintext = tokio::task::spawn_blocking(move || keys::decrypt(&ciphertext, &key))
            .await
            .map_err(|e| KeyError::Decryption { cause: e.to_string() })??;
        Ok(plaintext)
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Result<T, ClientError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
            .ok_or(ClientError::NotLoggedIn)
    }
}
