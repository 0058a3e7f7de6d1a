//! Welcome email sent after a paid signup.

use super::Email;

pub const DEFAULT_FROM: &str = "Seisei <noreply@seisei.me>";
pub const DEFAULT_SUBJECT: &str = "Seiseiへようこそ！アカウント情報";

/// Sender, subject and login link for welcome emails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeTemplate {
    pub from: String,
    pub subject: String,
    pub login_url: String,
}

impl Default for WelcomeTemplate {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            login_url: "http://localhost:3000/login".to_string(),
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl WelcomeTemplate {
    /// Render the email carrying the login email and temporary credential.
    pub fn render(&self, to: &str, temp_credential: &str, brand_name: Option<&str>) -> Email {
        let greeting = match brand_name.map(str::trim).filter(|b| !b.is_empty()) {
            Some(brand) => format!("ようこそ {} 様！", escape_html(brand)),
            None => "ようこそ！".to_string(),
        };
        let email_html = escape_html(to);
        let credential_html = escape_html(temp_credential);
        let login_url = escape_html(&self.login_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="margin:0;padding:0;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;background:#f9fafb;">
  <div style="max-width:560px;margin:40px auto;background:#fff;border-radius:12px;overflow:hidden;">
    <div style="background:#000;padding:32px 40px;">
      <h1 style="margin:0;color:#fff;font-size:24px;font-weight:700;">生成 Seisei</h1>
    </div>
    <div style="padding:40px;">
      <h2 style="margin:0 0 8px;font-size:20px;color:#111;">{greeting}</h2>
      <p style="color:#6b7280;line-height:1.6;">アカウントが作成されました。以下の仮パスワードでログインし、ダッシュボードからパスワードを変更してください。</p>
      <div style="background:#f3f4f6;border-radius:8px;padding:20px;margin:24px 0;">
        <p style="margin:0 0 8px;font-size:13px;color:#6b7280;">メールアドレス</p>
        <p style="margin:0 0 16px;font-size:16px;color:#111;font-weight:600;">{email_html}</p>
        <p style="margin:0 0 8px;font-size:13px;color:#6b7280;">仮パスワード</p>
        <p style="margin:0;font-size:16px;color:#111;font-family:monospace;font-weight:600;">{credential_html}</p>
      </div>
      <a href="{login_url}" style="display:inline-block;background:#000;color:#fff;text-decoration:none;padding:12px 32px;border-radius:8px;font-weight:600;">ログインする</a>
      <p style="margin:24px 0 0;font-size:13px;color:#9ca3af;">セキュリティのため、ログイン後すぐにパスワードを変更してください。</p>
    </div>
  </div>
</body>
</html>"#
        );

        let text = format!(
            "{}\n\nメールアドレス: {}\n仮パスワード: {}\nログイン: {}\n",
            greeting.replace("&amp;", "&"),
            to,
            temp_credential,
            self.login_url
        );

        Email::new(&self.from, to, &self.subject).html(html).text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_credentials() {
        let template = WelcomeTemplate {
            login_url: "https://seisei.me/login".to_string(),
            ..Default::default()
        };
        let email = template.render("buyer@example.com", "Ab3$xY9!qR2@mN7#", Some("Lumen"));

        assert_eq!(email.from, DEFAULT_FROM);
        assert_eq!(email.to, vec!["buyer@example.com"]);
        assert_eq!(email.subject, DEFAULT_SUBJECT);
        let html = email.html.as_deref().unwrap();
        assert!(html.contains("Ab3$xY9!qR2@mN7#"));
        assert!(html.contains("ようこそ Lumen 様！"));
        assert!(html.contains("https://seisei.me/login"));
        assert!(email.validate().is_ok());
    }

    #[test]
    fn test_render_escapes_brand() {
        let email = WelcomeTemplate::default().render("a@example.com", "pw", Some("<script>"));
        let html = email.html.unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_render_without_brand() {
        let email = WelcomeTemplate::default().render("a@example.com", "pw", Some("  "));
        assert!(email.html.unwrap().contains("ようこそ！"));
    }
}
