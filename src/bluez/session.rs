//! Process-wide BlueZ session management.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::Result;

/// Returns the process-wide `bluer` session, creating it on first use.
///
/// Every scanner and client shares this one D-Bus connection, so they all
/// amortize a single BlueZ object-manager view instead of each mirroring the
/// daemon's object tree.
pub(super) async fn shared() -> Result<Arc<bluer::Session>> {
    static SESSION: OnceCell<Arc<bluer::Session>> = OnceCell::const_new();
    SESSION
        .get_or_try_init(|| async {
            if let Ok(uid) = std::env::var("BLEAK_DBUS_AUTH_UID") {
                // D-Bus EXTERNAL authentication presents the process
                // credentials, which inside a user namespace differ from the
                // UID the host bus expects. libdbus offers no per-connection
                // override, so the variable only documents intent here; the
                // process must run with a matching UID mapping.
                match uid.parse::<u32>() {
                    Ok(uid) => debug!(uid, "BLEAK_DBUS_AUTH_UID set, expecting host bus UID"),
                    Err(_) => warn!(uid, "ignoring non-numeric BLEAK_DBUS_AUTH_UID"),
                }
            }
            let session = bluer::Session::new().await?;
            Ok(Arc::new(session))
        })
        .await
        .cloned()
}
