use std::time::Duration;

use appsh::{
    CorsOptions, EndpointOptions, HttpError, HttpServer, SendOptions, Shell, SseOptions,
    adapters::{
        BodyOptions, JsonOptions, body, handler_fn, json, probe_fn, request_timing, sync_handler,
    },
    config::{ConfigResolver, HttpConfig, ShellConfig},
    core::cors::AllowList,
};
use chrono::Utc;
use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration overrides, e.g. `--http-network-port=9000` or `--log-level=debug`
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let resolver = ConfigResolver::new(args.overrides)?;
    let mut shell = Shell::with_resolver(
        ShellConfig::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        resolver,
    )?;

    let mut server = shell.http_server_with(&HttpConfig::default(), vec![request_timing()])?;
    let origins = shell.get_string("CORS_ORIGINS", Some("*"))?;
    register_routes(&mut server, &origins)?;
    server.healthcheck(probe_fn(|| async { Ok(true) }));

    shell.serve(server).await?;

    let code = shell.run().await;
    std::process::exit(code);
}

fn register_routes(server: &mut HttpServer, origins: &str) -> Result<()> {
    server.get(
        "/hello/:name",
        sync_handler(|_req, res, ctx| {
            res.set_text(format!("hello {}", ctx.param("name").unwrap_or("world")));
            Ok(())
        }),
        EndpointOptions::new(),
    )?;

    server.post(
        "/echo",
        sync_handler(|req, res, ctx| {
            if ctx.json().is_none() {
                return Err(HttpError::bad_request("Expected a JSON or form body").into());
            }
            res.set_json(&json!({
                "contentType": req.content_type(),
                "query": ctx.url().query(),
                "body": ctx.json(),
            }))?;
            Ok(())
        }),
        EndpointOptions::new()
            .middleware(body(BodyOptions::default()))
            .middleware(json(JsonOptions::default())),
    )?;

    let allowed = AllowList::only(origins.split(',').map(str::trim));
    server.get(
        "/api/time",
        sync_handler(|_req, res, _ctx| {
            res.set_json(&json!({ "now": Utc::now().to_rfc3339() }))?;
            Ok(())
        }),
        EndpointOptions::new().cors(
            CorsOptions::new()
                .origins(allowed)
                .headers_exposed(["x-request-id"])
                .max_age(Duration::from_secs(600)),
        ),
    )?;

    server.get(
        "/events/clock",
        handler_fn(|_req, _res, ctx| {
            Box::pin(async move {
                let session = ctx
                    .take_sse()
                    .ok_or_else(|| eyre!("clock route is not an SSE route"))?;
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_secs(1));
                    let mut seq = 0u64;
                    loop {
                        tokio::select! {
                            _ = session.closed() => break,
                            _ = ticker.tick() => {
                                seq += 1;
                                let options = SendOptions::event("tick").with_id(seq);
                                if session.send_data(&Utc::now().to_rfc3339(), &options).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    session.close().await;
                });
                Ok(())
            })
        }),
        EndpointOptions::new().sse(
            SseOptions::new()
                .with_retry(Duration::from_secs(3))
                .with_ping(Duration::from_secs(15)),
        ),
    )?;

    Ok(())
}
