//! Reply used when no provider is configured

/// Minimal static page recorded as the assistant's answer while offline
pub const OFFLINE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>My Site</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 0; color: #1f2933; }
    header { padding: 4rem 2rem; background: #f5f7fa; text-align: center; }
    main { max-width: 40rem; margin: 2rem auto; padding: 0 1rem; line-height: 1.6; }
  </style>
</head>
<body>
  <header>
    <h1>Welcome to your new site</h1>
    <p>This is a starter page.</p>
  </header>
  <main>
    <p>No AI provider is configured, so this page was generated offline.</p>
    <p>Add an API key to get pages written from your description.</p>
  </main>
</body>
</html>
"#;
