/// Browser loader served at `/lead-form.js`. It reads its own `data-*`
/// attributes, and when the page has a `#form-wrapper` it fetches one widget
/// fragment from the server and drops it in. Submits are intercepted and
/// posted with `fetch`; the page navigates to whatever the server answers.
pub fn loader_script(widget_url: &str) -> String {
    let widget_url = serde_json::to_string(widget_url).unwrap_or_else(|_| "\"/widget\"".into());
    format!(
        r#"// lead-form loader
(function() {{
  const script = document.currentScript;
  const wrapper = document.getElementById("form-wrapper");
  if (!script || !wrapper) return;

  const data = script.dataset;
  const errorUrl = data.errorUrl || "/error";
  const params = new URLSearchParams();
  params.set("lang", data.lang || "en");
  params.set("success-url", data.successUrl || "/");
  params.set("error-url", errorUrl);
  if (data.customLabels) params.set("custom-labels", data.customLabels);
  params.set("page-url", window.location.href);
  if (document.referrer) params.set("referrer", document.referrer);

  wrapper.addEventListener("submit", function(event) {{
    const form = event.target;
    if (!(form instanceof HTMLFormElement)) return;
    event.preventDefault();
    fetch(form.action, {{
      method: "POST",
      body: new URLSearchParams(new FormData(form)),
      headers: {{ "Accept": "application/json" }},
      credentials: "omit"
    }})
      .then(function(res) {{ return res.json(); }})
      .then(function(reply) {{
        if (typeof reply.html === "string") {{
          wrapper.innerHTML = reply.html;
          return;
        }}
        window.location.href = reply.location || errorUrl;
      }})
      .catch(function(err) {{
        console.warn("lead-form: submit failed", err);
        window.location.href = errorUrl;
      }});
  }});

  fetch({widget_url} + "?" + params.toString(), {{ credentials: "omit" }})
    .then(function(res) {{
      if (!res.ok) throw new Error("status " + res.status);
      return res.text();
    }})
    .then(function(html) {{ wrapper.innerHTML = html; }})
    .catch(function(err) {{ console.warn("lead-form: failed to load widget", err); }});
}})();
"#
    )
}
