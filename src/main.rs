// Web server entry point
use actix_web::{middleware, web, App, HttpServer};
use caption_server::api::{cors, routes};
use caption_server::config::Args;
use caption_server::models::blip::BlipInferenceModel;
use caption_server::state::AppState;
use candle::Device;
use clap::Parser;
use log::info;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let blip_model =
        BlipInferenceModel::load(&args.model_id, &args.revision, args.max_tokens, Device::Cpu)?;
    let state = web::Data::new(AppState::new(Arc::new(blip_model), args.max_upload_mb));

    info!("serving captions on http://{}:{}", args.host, args.port);
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors())
            .wrap(middleware::Logger::default())
            .configure(routes)
    });
    if let Some(workers) = args.workers {
        server = server.workers(workers);
    }
    server.bind((args.host.as_str(), args.port))?.run().await?;
    Ok(())
}
