fn main() {
    // Gateway credentials and broker identity are baked in with option_env!
    for var in [
        "GATEWAY_WIFI_SSID",
        "GATEWAY_WIFI_PASSWORD",
        "GATEWAY_MQTT_HOST",
        "GATEWAY_MQTT_CLIENT_ID",
    ] {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    // ESP-IDF link arguments are only needed for the Xtensa firmware build
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") {
        embuild::espidf::sysenv::output();
    }
}
