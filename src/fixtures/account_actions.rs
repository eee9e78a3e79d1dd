use super::{literal, Fixture, SuiteContext};

// Key derived from the seed phrase used for the second account.
const SEED_PHRASE: &str =
    "crisp clump stay mean dynamic become fashion mail bike disorder chronic sight";
const SEED_PUBLIC_KEY: &str = "ed25519:GPnL8k4MV1hLccB5rkNiihVAEEmQX3BTDJnmW1T7ZDXG";

const SIGNED_SEND: &str = "sign-with-legacy-keychain send$";

pub(super) fn fixtures(ctx: &SuiteContext) -> Vec<Fixture> {
    let [first, second, third, fourth, fifth, sixth] =
        [1, 2, 3, 4, 5, 6].map(|n| ctx.account("ac", n));
    let sub_first = format!("sub.{first}");
    let sub_second = format!("sub.{second}");
    let too_long = "x".repeat(65);

    vec![
        Fixture::new(
            "create pre-funded account",
            format!("create-account {first} --useFaucet"),
            literal(&format!("New account <{first}> created successfully.")),
        )
        .provides(&[&first]),
        Fixture::new(
            "create pre-funded account from seed phrase",
            format!("create-account {second} --seedPhrase \"{SEED_PHRASE}\" --useFaucet"),
            literal(&format!("New account <{second}> created successfully.")),
        )
        .provides(&[&second]),
        Fixture::new(
            "create subaccount with public key and balance",
            format!(
                "create-account {sub_first} --accountId {first} \
                 --publicKey \"78MziB9aTNsu19MHHVrfWy762S5mAqXgCB6Vgvrv9uGV\" --initialBalance 0.1"
            ),
            literal(&format!(
                "New account <{sub_first}> has been successfully created."
            )),
        )
        .suggestion(SIGNED_SEND)
        .requires(&[&first])
        .provides(&[&sub_first]),
        Fixture::new(
            "create account funded by another account",
            format!("create-account {third} --accountId {first}"),
            literal(&format!(
                "The \"create_account\" call to <testnet> on behalf of <{first}> succeeded."
            )),
        )
        .suggestion(SIGNED_SEND)
        .requires(&[&first])
        .provides(&[&third]),
        Fixture::new(
            "create zero-balance account",
            format!("create-account {fourth} --accountId {first} --initialBalance 0"),
            literal(&format!(
                "The \"create_account\" call to <testnet> on behalf of <{first}> succeeded."
            )),
        )
        .suggestion(SIGNED_SEND)
        .requires(&[&first])
        .provides(&[&fourth]),
        Fixture::new(
            "fail to create subaccount of another account",
            format!("create-account {sub_second} --accountId {first}"),
            literal(&format!(
                "Signer account <{first}> does not have permission to create account <{sub_second}>."
            )),
        )
        .requires(&[&first, &second]),
        Fixture::new(
            "fail to fund from non-existing account",
            format!("create-account {fifth} --accountId {sixth}"),
            literal(&format!(
                "Access key file for account <{sixth}> on network <testnet> not found!"
            )),
        ),
        Fixture::new(
            "fail to create short top-level account",
            format!("create-account tooshortfortla --accountId {first}"),
            literal("Account <tooshortfortla> has <14> character count."),
        )
        .requires(&[&first]),
        Fixture::new(
            "fail to create account with too long name",
            format!("create-account {too_long} --accountId {first}"),
            literal("the Account ID is too long"),
        ),
        Fixture::new(
            "fail to use faucet on mainnet",
            format!("create-account {fifth} --useFaucet --networkId mainnet"),
            literal("The <mainnet> network does not have a faucet"),
        ),
        Fixture::new(
            "fail to fund beyond master balance",
            format!("create-account {fifth} --accountId {first} --initialBalance 100"),
            literal(&format!("Account <{first}> does not have enough balance")),
        )
        .requires(&[&first]),
        Fixture::new(
            "delete account",
            format!("delete-account {third} {first}"),
            literal(&format!("Account <{third}> has been successfully deleted.")),
        )
        .requires(&[&third, &first]),
        Fixture::new(
            "fail to delete account on mainnet",
            format!("delete-account {third} {first} --networkId mainnet"),
            literal(&format!(
                "Access key file for account <{third}> on network <mainnet> not found!"
            )),
        ),
        // last, so the access key list has settled
        Fixture::new(
            "list keys of seed phrase account",
            format!("keys {second}"),
            format!(".*{}.*", literal(SEED_PUBLIC_KEY)),
        )
        .requires(&[&second]),
    ]
}
