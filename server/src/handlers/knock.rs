//! Port knocking handler

use crate::capture::Knock;
use crate::config::LoggingConfig;
use chrono::Utc;
use protocol::{KnockEngine, Verdict};
use tracing::{debug, info, warn};

/// Handle one observed knock
///
/// The client never gets a reply; the verdict only drives logging and any
/// downstream action.
pub fn handle_knock(knock: Knock, engine: &KnockEngine, logging: &LoggingConfig) -> Verdict {
    let verdict = engine.observe(knock.source, knock.port, Utc::now());

    match &verdict {
        Verdict::Partial {
            secret_id,
            received,
            expected,
        } => {
            debug!(
                "Knock {}/{} from {} matches {}",
                received, expected, knock.source, secret_id
            );
        }
        Verdict::Complete { secret_id } => {
            if logging.log_accepted {
                info!("Authenticated {} with secret {}", knock.source, secret_id);
            }
        }
        Verdict::Rejected => {
            if logging.log_rejected {
                info!("Rejected knock on port {} from {}", knock.port, knock.source);
            } else {
                debug!("Rejected knock on port {} from {}", knock.port, knock.source);
            }
        }
        Verdict::ProtocolError { received } => {
            warn!(
                "Abandoned knock attempt from {} after {} ports",
                knock.source, received
            );
        }
    }

    verdict
}
