pub mod amqp;
pub mod kubernetes;
pub mod observability;
pub mod tls;
