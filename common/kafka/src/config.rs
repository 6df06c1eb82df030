use std::str::FromStr;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use thiserror::Error;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // plaintext, ssl, sasl_plaintext, sasl_ssl. Derived from KAFKA_TLS when unset.
    pub kafka_security_protocol: Option<String>,

    #[envconfig(default = "SCRAM-SHA-512")]
    pub kafka_sasl_mechanism: String,

    pub kafka_sasl_username: Option<String>,

    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

impl FromStr for SecurityProtocol {
    type Err = KafkaConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "ssl" => Ok(SecurityProtocol::Ssl),
            "sasl_plaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
            _ => Err(KafkaConfigError::UnknownSecurityProtocol(s.to_owned())),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KafkaConfigError {
    #[error("no kafka hosts configured")]
    MissingHosts,
    #[error("unknown kafka security protocol: {0}")]
    UnknownSecurityProtocol(String),
    #[error("security protocol {0} requires KAFKA_SASL_USERNAME and KAFKA_SASL_PASSWORD")]
    MissingSaslCredentials(&'static str),
    #[error("unknown kafka compression codec: {0}")]
    UnknownCompressionCodec(String),
}

const COMPRESSION_CODECS: &[&str] = &["none", "gzip", "snappy", "lz4", "zstd"];

impl KafkaConfig {
    pub fn security_protocol(&self) -> Result<SecurityProtocol, KafkaConfigError> {
        match &self.kafka_security_protocol {
            Some(protocol) => protocol.parse(),
            None if self.kafka_tls => Ok(SecurityProtocol::Ssl),
            None => Ok(SecurityProtocol::Plaintext),
        }
    }

    /// Checks the settings that librdkafka would otherwise only reject when
    /// the first connection is attempted.
    pub fn validate(&self) -> Result<(), KafkaConfigError> {
        if self.kafka_hosts.trim().is_empty() {
            return Err(KafkaConfigError::MissingHosts);
        }

        let protocol = self.security_protocol()?;
        if protocol.uses_sasl()
            && (self.kafka_sasl_username.is_none() || self.kafka_sasl_password.is_none())
        {
            return Err(KafkaConfigError::MissingSaslCredentials(protocol.as_str()));
        }

        if !COMPRESSION_CODECS.contains(&self.kafka_compression_codec.as_str()) {
            return Err(KafkaConfigError::UnknownCompressionCodec(
                self.kafka_compression_codec.clone(),
            ));
        }

        Ok(())
    }

    /// Connection and security settings shared by producers and consumers.
    pub fn client_config(&self) -> Result<ClientConfig, KafkaConfigError> {
        let protocol = self.security_protocol()?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("security.protocol", protocol.as_str());

        if matches!(protocol, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl) && self.kafka_tls
        {
            client_config.set("enable.ssl.certificate.verification", "false");
        }

        if protocol.uses_sasl() {
            client_config.set("sasl.mechanism", &self.kafka_sasl_mechanism);
            if let Some(username) = &self.kafka_sasl_username {
                client_config.set("sasl.username", username);
            }
            if let Some(password) = &self.kafka_sasl_password {
                client_config.set("sasl.password", password);
            }
        }

        Ok(client_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_security_protocol: None,
            kafka_sasl_mechanism: "SCRAM-SHA-512".to_string(),
            kafka_sasl_username: None,
            kafka_sasl_password: None,
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
        }
    }

    #[test]
    fn protocol_defaults_follow_tls_flag() {
        let mut config = config();
        assert_eq!(config.security_protocol(), Ok(SecurityProtocol::Plaintext));

        config.kafka_tls = true;
        assert_eq!(config.security_protocol(), Ok(SecurityProtocol::Ssl));

        config.kafka_security_protocol = Some("SASL_SSL".to_string());
        assert_eq!(config.security_protocol(), Ok(SecurityProtocol::SaslSsl));
    }

    #[test]
    fn sasl_requires_credentials() {
        let mut config = config();
        config.kafka_security_protocol = Some("sasl_ssl".to_string());
        assert_eq!(
            config.validate(),
            Err(KafkaConfigError::MissingSaslCredentials("sasl_ssl"))
        );

        config.kafka_sasl_username = Some("notifier".to_string());
        config.kafka_sasl_password = Some("secret".to_string());
        assert_eq!(config.validate(), Ok(()));

        let client_config = config.client_config().unwrap();
        assert_eq!(client_config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(client_config.get("sasl.username"), Some("notifier"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = config();
        config.kafka_security_protocol = Some("carrier-pigeon".to_string());
        assert!(matches!(
            config.validate(),
            Err(KafkaConfigError::UnknownSecurityProtocol(_))
        ));

        let mut config = self::config();
        config.kafka_compression_codec = "brotli".to_string();
        assert!(matches!(
            config.validate(),
            Err(KafkaConfigError::UnknownCompressionCodec(_))
        ));

        let mut config = self::config();
        config.kafka_hosts = " ".to_string();
        assert_eq!(config.validate(), Err(KafkaConfigError::MissingHosts));
    }
}
