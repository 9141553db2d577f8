//! Response handlers applied to successful responses.
//!
//! - [`MeIdResponseHandler`] stores the identity tokens returned by a login.
//! - [`InAppMessageResponseHandler`] shows in-app messages once per campaign.
//!
//! [`default_handlers`] assembles the chain for a given feature set.

mod campaigns;
mod identity;
mod in_app;
mod me_id;

pub use campaigns::DisplayedCampaignRepository;
pub use identity::IdentityStore;
pub use in_app::{InAppMessageResponseHandler, InAppPresenter, LoggingPresenter};
pub use me_id::MeIdResponseHandler;

use engage_config_and_utils::{ExperimentalFeature, ExperimentalFeatures};
use engage_database::AsyncDatabase;
use request_outbox::ResponseHandler;
use std::sync::Arc;

/// The handler chain in declaration order.
///
/// The in-app handler is only installed when in-app messaging is enabled.
pub fn default_handlers(
    features: &ExperimentalFeatures,
    db: AsyncDatabase,
    presenter: Arc<dyn InAppPresenter>,
) -> Vec<Arc<dyn ResponseHandler>> {
    let mut handlers: Vec<Arc<dyn ResponseHandler>> =
        vec![Arc::new(MeIdResponseHandler::new(IdentityStore::new(db.clone())))];

    if features.is_enabled(ExperimentalFeature::InAppMessaging) {
        handlers.push(Arc::new(InAppMessageResponseHandler::new(
            DisplayedCampaignRepository::new(db),
            presenter,
        )));
    }

    handlers
}
