//! Property tests for transport policy selection and resolution.

mod util;

use proptest::prelude::*;

use bsp_sync::config::{DeployConfig, MAX_CONTAINER_NAME_LEN};
use bsp_sync::model::{TransportPolicy, TransportRef};
use bsp_sync::transport::TransportResolver;
use util::{ScriptedExchange, session, target};

fn config(
    package: &str,
    transport_no: Option<String>,
    create: bool,
    locked: bool,
    user_match: bool,
) -> DeployConfig {
    let mut config = DeployConfig::default();
    config.connection.server = "https://abap.example.com".into();
    config.auth.user = "DEVELOPER".into();
    config.auth.password = Some("secret".into());
    config.target.package = package.into();
    config.target.container = "ZAPP".into();
    config.target.container_description = "App".into();
    config.target.transport_no = transport_no;
    config.target.create_transport = create;
    config.target.transport_text = Some("Deploy".into());
    config.target.transport_use_locked = locked;
    config.target.transport_use_user_match = user_match;
    config
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: a temporary package without an explicit number never resolves
    /// and never talks to the transport endpoints.
    #[test]
    fn property_temporary_package_never_resolves(
        package in prop_oneof![Just("$TMP"), Just("$tmp")],
        create in any::<bool>(),
        locked in any::<bool>(),
        user_match in any::<bool>(),
    ) {
        let options = config(package, None, create, locked, user_match).transport_options();
        prop_assert_eq!(&options.policy, &TransportPolicy::NoneRequired);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let exchange = ScriptedExchange::with_token();
        let session = session(&exchange);
        let resolved = runtime
            .block_on(TransportResolver::new(&session).resolve(&target(package, "ZAPP"), &options))
            .unwrap();
        prop_assert_eq!(resolved, None);
        prop_assert!(exchange.requests().is_empty());
    }

    /// PROPERTY: an explicit number is passed through unchanged, for any package.
    #[test]
    fn property_explicit_number_passes_through(
        package in prop_oneof![Just("$TMP".to_string()), "Z[A-Z0-9_]{1,20}"],
        number in "[A-Z]{3}K9[0-9]{5}",
        padding in " {0,3}",
    ) {
        let padded = format!("{padding}{number}{padding}");
        let options = config(&package, Some(padded), false, false, false).transport_options();
        prop_assert_eq!(&options.policy, &TransportPolicy::Explicit(TransportRef::new(number.clone())));

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let exchange = ScriptedExchange::with_token();
        let session = session(&exchange);
        let resolved = runtime
            .block_on(TransportResolver::new(&session).resolve(&target(&package, "ZAPP"), &options))
            .unwrap();
        prop_assert_eq!(resolved, Some(TransportRef::new(number)));
        prop_assert!(exchange.requests().is_empty());
    }

    /// PROPERTY: exactly one policy is selected and it follows the documented precedence.
    #[test]
    fn property_policy_precedence(
        create in any::<bool>(),
        locked in any::<bool>(),
        user_match in any::<bool>(),
    ) {
        let options = config("ZTEST", None, create, locked, user_match).transport_options();
        let expected = if locked {
            TransportPolicy::ReuseLocked
        } else if user_match {
            TransportPolicy::ReuseUserOwned
        } else {
            TransportPolicy::CreateNew
        };
        prop_assert_eq!(options.policy, expected);
        prop_assert_eq!(options.allow_create, create);
    }

    /// PROPERTY: the container length rule ignores any namespace prefix.
    #[test]
    fn property_container_length_ignores_namespace(
        namespace in prop_oneof![Just(String::new()), "/[A-Z]{1,8}/"],
        name in "[A-Z][A-Z0-9_]{0,24}",
    ) {
        let mut config = config("$TMP", None, false, false, false);
        config.target.container = format!("{namespace}{name}");
        let result = config.validate();
        let too_long = name.len() > MAX_CONTAINER_NAME_LEN;
        prop_assert_eq!(
            result.errors.iter().any(|e| e.contains("must not be longer")),
            too_long
        );
    }
}
