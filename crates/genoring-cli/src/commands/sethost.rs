use super::run_operation;
use genoring_core::Engine;
use genoring_schema::ServiceName;

pub fn run(engine: &Engine, service: &ServiceName, ip: Option<&str>, json: bool) -> Result<u8, String> {
    let done = match ip {
        Some(ip) => format!("{service} now points to {ip}"),
        None => format!("{service} runs locally again"),
    };
    run_operation(&format!("updating {service}"), &done, json, || {
        engine.set_external_host(service, ip)
    })
}
