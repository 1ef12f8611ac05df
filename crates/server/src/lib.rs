mod error;

use std::net::SocketAddr;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use tokio::net::TcpListener;

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

pub struct ServeConfig {
    pub listen_address: SocketAddr,
    pub config: Config,
}

pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> crate::Result<()> {
    let gateway = llm::router(&config).map_err(|e| error::Error::Router(e.to_string()))?;

    let app = Router::new().merge(gateway);

    let listener = TcpListener::bind(listen_address).await.map_err(error::Error::Bind)?;

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| error::Error::Tls(e.to_string()))?;

            log::info!("Gateway listening at: https://{listen_address}");

            let std_listener = listener.into_std().map_err(error::Error::Bind)?;

            axum_server::from_tcp_rustls(std_listener, rustls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| error::Error::Server(std::io::Error::other(e)))?;
        }
        None => {
            log::info!("Gateway listening at: http://{listen_address}");

            axum::serve(listener, app).await.map_err(error::Error::Server)?;
        }
    }

    Ok(())
}
