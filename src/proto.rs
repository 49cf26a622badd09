pub mod platform {
    tonic::include_proto!("bera.platform");
}
