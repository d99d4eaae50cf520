pub mod accounts;
pub mod children;
pub mod messages;
pub mod rooms;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use weldiwin_db::Database;

pub use accounts::Accounts;
pub use children::{ChildDraft, Children};
pub use messages::Messages;
pub use rooms::Rooms;
pub use store::Store;

/// The service layer shared by the REST handlers and the realtime gateway.
#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub accounts: Accounts,
    pub children: Children,
    pub rooms: Rooms,
    pub messages: Messages,
}

impl Services {
    pub fn new(db: Arc<Database>, store_timeout: Duration) -> Self {
        let store = Store::new(db, store_timeout);
        let accounts = Accounts::new(store.clone());
        let rooms = Rooms::new(store.clone());
        let children = Children::new(store.clone(), accounts.clone(), rooms.clone());
        let messages = Messages::new(store.clone(), rooms.clone());
        Self {
            store,
            accounts,
            children,
            rooms,
            messages,
        }
    }
}
