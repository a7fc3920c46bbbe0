use serde_json::json;

use crate::app::AppContext;

/// Show the selected connection and try to reach it.
pub fn handle_status(ctx: &AppContext) -> anyhow::Result<()> {
    let (name, mut engine) = ctx.open_engine()?;
    engine.connect()?;
    let config = engine.config();
    let port = config
        .effective_port()
        .map(|port| port.to_string())
        .unwrap_or_default();

    if ctx.json() {
        let status = json!({
            "connection": name,
            "engine": config.engine.to_string(),
            "host": config.host,
            "port": config.effective_port(),
            "database": config.database,
            "connected": true,
        });
        println!("{}", crate::output::to_json(&status)?);
    } else if !ctx.quiet() {
        println!("Connection: {}", name);
        println!("Engine:     {}", config.engine);
        if port.is_empty() {
            println!("Host:       {}", config.host);
        } else {
            println!("Host:       {}:{}", config.host, port);
        }
        println!("Database:   {}", config.database);
        println!("Status:     connected");
    }

    engine.disconnect();
    Ok(())
}
