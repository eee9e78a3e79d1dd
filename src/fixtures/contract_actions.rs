use super::{literal, Fixture, SuiteContext};

const DEPLOYED: &str = "Contract code has been successfully deployed.";

pub(super) fn fixtures(ctx: &SuiteContext) -> Vec<Fixture> {
    let [guest_book, token, initialized_token] = [1, 2, 3].map(|n| ctx.account("ct", n));
    let guest_book_wasm = ctx.resource("guest_book.wasm");
    let token_wasm = ctx.resource("fungible_token.wasm");

    let created = |account: &str| literal(&format!("New account <{account}> created successfully."));
    let called = |method: &str, account: &str| {
        literal(&format!(
            "The \"{method}\" call to <{account}> on behalf of <{account}> succeeded."
        ))
    };
    let message = |account: &str, text: &str| {
        format!(
            r#""sender": "{}",\n\s*"text": "{}""#,
            literal(account),
            literal(text)
        )
    };

    vec![
        Fixture::new(
            "create guest book account",
            format!("create-account {guest_book} --useFaucet"),
            created(&guest_book),
        )
        .provides(&[&guest_book]),
        Fixture::new(
            "deploy contract without init",
            format!("deploy {guest_book} {guest_book_wasm}"),
            literal(DEPLOYED),
        )
        .requires(&[&guest_book]),
        Fixture::new(
            "call with base64 arguments",
            format!("call {guest_book} addMessage --base64 'eyJ0ZXh0IjoiSlNPTiJ9' --accountId {guest_book}"),
            called("addMessage", &guest_book),
        )
        .requires(&[&guest_book]),
        Fixture::new(
            "view message added with base64 arguments",
            format!("view {guest_book} getMessages '{{}}'"),
            message(&guest_book, "JSON"),
        )
        .wait_for_next_block()
        .requires(&[&guest_book]),
        Fixture::new(
            "call with json arguments",
            format!("call {guest_book} addMessage '{{\"text\":\"BASE64\"}}' --accountId {guest_book}"),
            called("addMessage", &guest_book),
        )
        .requires(&[&guest_book]),
        Fixture::new(
            "view message added with json arguments",
            format!("view {guest_book} getMessages '{{}}'"),
            message(&guest_book, "BASE64"),
        )
        .wait_for_next_block()
        .requires(&[&guest_book]),
        Fixture::new(
            "create fungible token account",
            format!("create-account {token} --useFaucet"),
            created(&token),
        )
        .provides(&[&token]),
        Fixture::new(
            "deploy token contract without init",
            format!("deploy {token} {token_wasm}"),
            literal(DEPLOYED),
        )
        .requires(&[&token]),
        Fixture::new(
            "fail to view balance of uninitialized token",
            format!("view {token} get_balance '{{\"owner_id\":\"something.testnet\"}}'"),
            literal("Fun token should be initialized before usage"),
        )
        .wait_for_next_block()
        .requires(&[&token]),
        Fixture::new(
            "create initialized token account",
            format!("create-account {initialized_token} --useFaucet"),
            created(&initialized_token),
        )
        .provides(&[&initialized_token]),
        Fixture::new(
            "deploy token contract with init function",
            format!(
                "deploy {initialized_token} {token_wasm} --initFunction new \
                 --initArgs '{{\"owner_id\":\"{initialized_token}\",\"total_supply\":\"1000000\"}}'"
            ),
            literal(DEPLOYED),
        )
        .wait_for_next_block()
        .requires(&[&initialized_token]),
        Fixture::new(
            "view balance of initialized token",
            format!("view {initialized_token} get_balance '{{\"owner_id\":\"{initialized_token}\"}}'"),
            literal("\"1000000\""),
        )
        .wait_for_next_block()
        .requires(&[&initialized_token]),
    ]
}
