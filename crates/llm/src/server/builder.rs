//! Builds the server state from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use config::Config;

use crate::{
    server::{LlmServer, LlmServerInner, ProviderHandle},
    transformer::{TransformerChain, build_chain},
};

pub(crate) struct LlmServerBuilder<'a> {
    config: &'a Config,
}

impl<'a> LlmServerBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn build(self) -> anyhow::Result<LlmServer> {
        log::debug!("Initializing gateway with {} providers", self.config.providers.len());

        crate::http_client::init(self.config.proxy.as_ref())?;

        let mut providers = Vec::with_capacity(self.config.providers.len());
        let mut routes = BTreeMap::new();

        for (index, (name, provider_config)) in self.config.providers.iter().enumerate() {
            log::debug!("Initializing provider: {name}");

            let (chain, model_chains) = match &provider_config.transformer {
                Some(transformer) => {
                    let chain = build_chain(&transformer.r#use)
                        .map_err(|e| anyhow::anyhow!("provider '{name}': {e}"))?;

                    let mut model_chains = BTreeMap::new();
                    for (model, scoped) in &transformer.models {
                        let scoped_chain = build_chain(&scoped.r#use)
                            .map_err(|e| anyhow::anyhow!("provider '{name}', model '{model}': {e}"))?;
                        model_chains.insert(model.clone(), scoped_chain);
                    }

                    (chain, model_chains)
                }
                None => (TransformerChain::default(), BTreeMap::new()),
            };

            // Advertised models route here unless an explicit route says
            // otherwise.
            for model in &provider_config.models {
                routes.entry(model.clone()).or_insert(index);
            }

            providers.push(ProviderHandle {
                name: name.clone(),
                config: provider_config.clone(),
                chain,
                model_chains,
            });
        }

        // Explicit routes win over advertised models.
        for (model, provider_name) in &self.config.routes {
            let Some(index) = providers.iter().position(|p| &p.name == provider_name) else {
                anyhow::bail!("Route for model '{model}' references unknown provider '{provider_name}'");
            };
            routes.insert(model.clone(), index);
        }

        if providers.is_empty() {
            anyhow::bail!("No providers configured");
        }

        log::debug!(
            "Gateway initialized with {} provider(s), {} route(s)",
            providers.len(),
            routes.len()
        );

        Ok(LlmServer {
            shared: Arc::new(LlmServerInner { providers, routes }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn build(toml_str: &str) -> anyhow::Result<LlmServer> {
        let config: Config = toml::from_str(toml_str).unwrap();
        LlmServerBuilder::new(&config).build()
    }

    #[test]
    fn builds_providers_with_chains_and_routes() {
        let server = build(indoc! {r#"
            [routes]
            "gpt-5-mini" = "openai"

            [providers.openai]
            api_base_url = "https://api.openai.com/v1"
            api_key = "test-key"
            models = ["gpt-5"]

            [providers.openai.transformer]
            use = ["openai"]

            [providers.openai.transformer.models."gpt-5"]
            use = ["reasoning"]
        "#})
        .unwrap();

        assert_eq!(server.shared.providers.len(), 1);
        assert_eq!(server.shared.routes.len(), 2);
        assert!(!server.shared.providers[0].chain.is_empty());
        assert!(server.shared.providers[0].model_chains.contains_key("gpt-5"));
    }

    #[test]
    fn unknown_transformer_name_fails_startup() {
        let error = build(indoc! {r#"
            [providers.openai]
            api_base_url = "https://api.openai.com/v1"
            api_key = "test-key"

            [providers.openai.transformer]
            use = ["made-up"]
        "#})
        .unwrap_err();

        assert!(error.to_string().contains("Unknown transformer 'made-up'"));
    }

    #[test]
    fn empty_provider_set_fails_startup() {
        let error = build("").unwrap_err();
        assert!(error.to_string().contains("No providers configured"));
    }
}
