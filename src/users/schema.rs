diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        display_name -> Nullable<Text>,
        role -> Text,
        permissions -> Text,
        preferences -> Text,
        last_login_at -> Nullable<BigInt>,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
