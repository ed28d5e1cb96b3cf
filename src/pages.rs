//! 会话模式的页面：首页、登录、注册。内联 HTML，不依赖模板引擎。

use axum::response::Html;
use std::fmt::Write;

use crate::session_auth::{Flash, FlashCategory};

const STYLE: &str = "body{font-family:sans-serif;max-width:860px;margin:2rem auto;padding:0 1rem}\
.flash{padding:.6rem 1rem;margin:.4rem 0;border-radius:4px}\
.success{background:#e3f6e5;color:#1d5b25}.error{background:#fbe4e4;color:#8a1f1f}\
nav a{margin-right:1rem}li{margin:.6rem 0}form.inline{display:inline}\
input[type=number]{width:6rem}";

/// 转义 HTML 特殊字符。
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(title: &str, user: Option<&str>, flashes: &[Flash], body: &str) -> Html<String> {
    let nav = match user {
        Some(username) => format!(
            "<nav><a href=\"/\">Home</a><a href=\"/logout\">Logout</a><span>Signed in as {}</span></nav>",
            escape(username)
        ),
        None => {
            "<nav><a href=\"/login\">Login</a><a href=\"/sign-up\">Sign Up</a></nav>".to_string()
        }
    };
    let mut notices = String::new();
    for flash in flashes {
        let class = match flash.category {
            FlashCategory::Success => "success",
            FlashCategory::Error => "error",
        };
        let _ = write!(
            notices,
            "<div class=\"flash {class}\">{}</div>",
            escape(&flash.message)
        );
    }
    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>{STYLE}</style></head><body>{nav}{notices}{body}</body></html>",
        escape(title)
    ))
}

pub fn home(username: &str, images: &[String], flashes: &[Flash]) -> Html<String> {
    let mut body = String::from(
        "<h1>Images</h1>\
         <form method=\"post\" action=\"/upload-image\" enctype=\"multipart/form-data\">\
         <input type=\"file\" name=\"image\" accept=\".png,.jpg,.jpeg\">\
         <button type=\"submit\">Upload</button></form>",
    );
    if images.is_empty() {
        body.push_str("<p>No images uploaded yet.</p>");
    } else {
        body.push_str("<ul>");
        for name in images {
            let name = escape(name);
            let _ = write!(
                body,
                "<li><a href=\"/download-image/{name}\">{name}</a> \
                 <form class=\"inline\" method=\"post\" action=\"/modify-image/{name}\">\
                 <input type=\"number\" name=\"width\" placeholder=\"width\" min=\"1\" max=\"1920\">\
                 <input type=\"number\" name=\"height\" placeholder=\"height\" min=\"1\" max=\"1080\">\
                 <input type=\"number\" name=\"rotate\" placeholder=\"rotate\" min=\"0\" max=\"359\">\
                 <input type=\"number\" name=\"contrast\" placeholder=\"contrast\" min=\"0\" max=\"10\" step=\"0.1\">\
                 <button type=\"submit\">Modify</button></form> \
                 <form class=\"inline\" method=\"post\" action=\"/delete-image/{name}\">\
                 <button type=\"submit\">Delete</button></form></li>"
            );
        }
        body.push_str("</ul>");
    }
    layout("Images", Some(username), flashes, &body)
}

pub fn login(error: Option<&str>, username: &str) -> Html<String> {
    let flashes = error_flash(error);
    let body = format!(
        "<h1>Login</h1><form method=\"post\" action=\"/login\">\
         <p><input name=\"username\" placeholder=\"Username\" value=\"{}\"></p>\
         <p><input type=\"password\" name=\"password\" placeholder=\"Password\"></p>\
         <button type=\"submit\">Login</button></form>",
        escape(username)
    );
    layout("Login", None, &flashes, &body)
}

pub fn sign_up(error: Option<&str>, email: &str, username: &str) -> Html<String> {
    let flashes = error_flash(error);
    let body = format!(
        "<h1>Sign Up</h1><form method=\"post\" action=\"/sign-up\">\
         <p><input type=\"email\" name=\"email\" placeholder=\"Email\" value=\"{}\"></p>\
         <p><input name=\"username\" placeholder=\"Username\" value=\"{}\"></p>\
         <p><input type=\"password\" name=\"password1\" placeholder=\"Password\"></p>\
         <p><input type=\"password\" name=\"password2\" placeholder=\"Confirm password\"></p>\
         <button type=\"submit\">Sign Up</button></form>",
        escape(email),
        escape(username)
    );
    layout("Sign Up", None, &flashes, &body)
}

fn error_flash(error: Option<&str>) -> Vec<Flash> {
    error
        .map(|message| Flash {
            category: FlashCategory::Error,
            message: message.to_string(),
        })
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_neutralizes_markup() {
        assert_eq!(
            escape("<script>alert('x')</script>&\""),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;&amp;&quot;"
        );
    }

    #[test]
    fn home_lists_images_with_controls() {
        let flashes = vec![Flash {
            category: FlashCategory::Success,
            message: "File a.png successfully uploaded".into(),
        }];
        let Html(page) = home("alice", &["a.png".to_string()], &flashes);
        assert!(page.contains("action=\"/modify-image/a.png\""));
        assert!(page.contains("action=\"/delete-image/a.png\""));
        assert!(page.contains("href=\"/download-image/a.png\""));
        assert!(page.contains("flash success"));
        assert!(page.contains("Signed in as alice"));
    }

    #[test]
    fn login_page_escapes_echoed_username() {
        let Html(page) = login(Some("Invalid credentials"), "<b>");
        assert!(page.contains("value=\"&lt;b&gt;\""));
        assert!(page.contains("flash error"));
    }
}
