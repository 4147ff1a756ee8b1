//! Construction of concrete backends from resolved settings.

use std::sync::Arc;

use jobrelay_openai::OpenAiClient;
use jobrelay_pubnub::{PubNubClient, PubNubSubscription};
use jobrelay_shared::{
    ChatModel, ContextStore, Embedder, PubNubSettings, RelayError, RelaySettings, Result,
    ResultStore, StoreSettings,
};
use jobrelay_storage::LocalStore;
use jobrelay_supabase::SupabaseClient;
use tracing::info;

use crate::generator::ResponseGenerator;
use crate::pipeline::Pipeline;
use crate::relay::Relay;
use crate::resolver::ContextResolver;

/// The store and model handles a pipeline runs against.
#[derive(Clone)]
pub struct Backends {
    pub context: Arc<dyn ContextStore>,
    pub results: Arc<dyn ResultStore>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
}

impl Backends {
    pub async fn connect(settings: &RelaySettings) -> Result<Self> {
        let openai = Arc::new(OpenAiClient::new(&settings.openai)?);

        let (context, results): (Arc<dyn ContextStore>, Arc<dyn ResultStore>) =
            match &settings.store {
                StoreSettings::Supabase {
                    url,
                    key,
                    timeout_secs,
                } => {
                    info!(%url, timeout_secs, "using hosted store");
                    let client = Arc::new(SupabaseClient::new(url, key.clone(), *timeout_secs)?);
                    let context: Arc<dyn ContextStore> = client.clone();
                    let results: Arc<dyn ResultStore> = client;
                    (context, results)
                }
                StoreSettings::Local { path } => {
                    info!(path = %path.display(), "using local store");
                    let store = Arc::new(LocalStore::open(path).await?);
                    let context: Arc<dyn ContextStore> = store.clone();
                    let results: Arc<dyn ResultStore> = store;
                    (context, results)
                }
            };

        Ok(Self {
            context,
            results,
            embedder: openai.clone(),
            chat: openai,
        })
    }

    pub fn pipeline(&self, settings: &RelaySettings) -> Pipeline {
        Pipeline::new(
            ContextResolver::new(
                self.context.clone(),
                self.embedder.clone(),
                settings.resolver.clone(),
            ),
            ResponseGenerator::new(self.chat.clone(), settings.resolver.max_context_chars),
            self.results.clone(),
        )
    }
}

/// Channel settings, required by commands that publish or subscribe.
pub fn channel_settings(settings: &RelaySettings) -> Result<&PubNubSettings> {
    settings
        .pubnub
        .as_ref()
        .ok_or_else(|| RelayError::config("PubNub settings were not resolved"))
}

/// Outbound relay plus a cursor on the inbound channel.
pub fn connect_channel(settings: &PubNubSettings) -> Result<(Relay, PubNubSubscription)> {
    let client = PubNubClient::new(settings)?;
    let subscription = client.subscribe(settings.job_channel.clone());
    let relay = Relay::new(Arc::new(client), settings.response_channel.clone());
    Ok((relay, subscription))
}
