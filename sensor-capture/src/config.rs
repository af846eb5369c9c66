use std::net::SocketAddr;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;
use sensor_common::reading::FieldConvention;

use crate::publisher::InvalidReadingPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "snake_case")]
    pub queue_field_convention: FieldConvention,

    #[envconfig(default = "dead_letter")]
    pub invalid_reading_policy: InvalidReadingPolicy, // dead_letter, drop

    #[envconfig(default = "1046528")]
    pub batch_max_bytes: usize, // Sum of payload sizes flushed together

    #[envconfig(default = "sensor_readings")]
    pub kafka_topic: String,

    #[envconfig(default = "sensor_readings_dlq")]
    pub kafka_dead_letter_topic: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}
