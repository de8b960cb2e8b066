use std::sync::Arc;

use devit_db::Database;

use crate::clock::Clock;
use crate::content::ContentService;
use crate::credentials::CredentialStore;
use crate::images::ImageStore;
use crate::session::AuthSessionService;
use crate::tokens::TokenIssuer;
use crate::votes::VoteLedger;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub sessions: AuthSessionService,
    pub votes: VoteLedger,
    pub content: ContentService,
}

impl AppStateInner {
    /// Wire every service onto one shared database handle.
    pub fn new(
        db: Arc<Database>,
        jwt_secret: &str,
        credentials: CredentialStore,
        images: Arc<dyn ImageStore>,
        clock: Arc<dyn Clock>,
    ) -> AppState {
        let tokens = TokenIssuer::new(jwt_secret, clock.clone());
        Arc::new(Self {
            sessions: AuthSessionService::new(db.clone(), credentials, tokens, clock.clone()),
            votes: VoteLedger::new(db.clone()),
            content: ContentService::new(db, images, clock),
        })
    }
}
