use unleash_client::{ClientConfig, Context, FeatureOptions, VariantOptions};

pub fn main() -> unleash_client::Result<()> {
    env_logger::init();

    let url = std::env::var("UNLEASH_URL").unwrap_or_else(|_| "http://localhost:4242/api".to_owned());
    let token = std::env::var("UNLEASH_API_TOKEN").unwrap_or_default();

    let client = ClientConfig::new("simple-demo", url)
        .custom_header("Authorization", token)
        .to_client()?;

    // Block waiting for features. Until this call returns, the client only knows the features
    // persisted by a previous run.
    client.wait_for_ready()?;

    let context = Context::new().user_id("test-user");
    let enabled = client.is_enabled(
        "new-checkout",
        &FeatureOptions::new().context(&context).fallback(false),
    );
    println!("new-checkout enabled: {enabled}");

    let variant = client.get_variant("checkout-button", &VariantOptions::new().context(&context));
    println!("checkout-button variant: {variant:?}");

    client.close()
}
