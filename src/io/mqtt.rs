//! MQTT subscriber for raw gateway telemetry
//!
//! Each publish on the configured topic carries the sensor JSON directly
//! (no base64 envelope) and is reconciled on its own task so a slow twin
//! store never stalls the event loop.

use crate::infra::config::MqttConfig;
use crate::services::orchestrator::Orchestrator;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Start the MQTT client and reconcile every received message
pub async fn start_mqtt_client(
    config: &MqttConfig,
    client_id: &str,
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new(client_id, config.host.as_str(), config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username.as_str(), password.as_str());
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.topic.as_str(), QoS::AtLeastOnce).await?;

    info!(topic = %config.topic, host = %config.host, port = %config.port, "mqtt_subscribed");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, bytes = %publish.payload.len(), "mqtt_message");
                        let orchestrator = orchestrator.clone();
                        tokio::spawn(async move {
                            // Rejections are logged and counted by the orchestrator
                            let _ = orchestrator.handle_raw_payload(&publish.payload).await;
                        });
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
