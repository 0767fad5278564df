use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{Filter, RetainForwardRule};
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::topic::TopicPrefix;

/// Build an MQTT v5 client for the configured broker.
///
/// The returned [`EventLoop`] must be polled for the connection to be
/// established; nothing goes over the wire before that.
pub fn connect(config: &BrokerConfig) -> Result<(AsyncClient, EventLoop)> {
    config.validate()?;

    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_start(true);

    match (&config.username, &config.password) {
        (Some(username), password) => {
            options.set_credentials(username.clone(), password.clone().unwrap_or_default());
        }
        (None, Some(_)) => {
            return Err(Error::Config(
                "broker password given without a username".to_string(),
            ));
        }
        (None, None) => {}
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %config.client_id,
        authenticated = config.username.is_some(),
        "Connecting to MQTT broker"
    );

    Ok(AsyncClient::new(options, config.channel_capacity))
}

/// Map a numeric QoS level onto the client's enum.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::Config(format!(
            "Invalid QoS {}. Expected 0, 1 or 2",
            other
        ))),
    }
}

/// Subscription filter that replays every retained message under the prefix.
///
/// `nolocal` keeps the broker from echoing our own publishes back, and
/// `preserve_retain` keeps the retain flag as it was published so replayed
/// state can be told apart from live traffic.
pub fn retained_replay_filter(prefix: &TopicPrefix) -> Filter {
    let mut filter = Filter::new(prefix.subscription_filter(), QoS::AtMostOnce);
    filter.nolocal = true;
    filter.preserve_retain = true;
    filter.retain_forward_rule = RetainForwardRule::OnEverySubscribe;
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[test]
    fn test_replay_filter() {
        let prefix = TopicPrefix::new("crestron/").unwrap();
        let filter = retained_replay_filter(&prefix);

        assert_eq!(filter.path, "crestron/#");
        assert!(filter.nolocal);
        assert!(filter.preserve_retain);
    }

    #[test]
    fn test_password_without_username() {
        let mut config = BrokerConfig::new("localhost", 1883);
        config.password = Some("secret".to_string());
        assert!(connect(&config).is_err());
    }
}
