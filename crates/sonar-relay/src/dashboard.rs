//! Static usage dashboard, rendered client-side from the /api/usage views.

use axum::response::{Html, IntoResponse};

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>sonar-relay usage</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 60rem; color: #222; }
  h1 { font-size: 1.4rem; }
  .cards { display: flex; gap: 1rem; flex-wrap: wrap; margin-bottom: 1.5rem; }
  .card { border: 1px solid #ddd; border-radius: 6px; padding: 0.8rem 1.2rem; min-width: 9rem; }
  .card .num { font-size: 1.6rem; font-weight: 600; }
  .card .label { color: #666; font-size: 0.8rem; }
  table { border-collapse: collapse; width: 100%; margin-bottom: 1.5rem; }
  th, td { text-align: left; padding: 0.3rem 0.6rem; border-bottom: 1px solid #eee; font-size: 0.9rem; }
  th { color: #666; font-weight: 600; }
  h2 { font-size: 1.1rem; margin-top: 1.5rem; }
</style>
</head>
<body>
<h1>sonar-relay usage</h1>
<div class="cards" id="cards"></div>
<h2>Tool calls</h2>
<table id="tools"><thead><tr><th>Tool</th><th>Count</th><th>Share</th></tr></thead><tbody></tbody></table>
<h2>Requests per hour (last 24h)</h2>
<table id="hourly"><thead><tr><th>Hour (UTC)</th><th>Requests</th></tr></thead><tbody></tbody></table>
<h2>Recent tool calls</h2>
<table id="recent"><thead><tr><th>Tool</th><th>Time</th><th>Client</th></tr></thead><tbody></tbody></table>
<script>
async function fetchJson(path) {
  const res = await fetch(path);
  return res.json();
}
function fill(tableId, rows) {
  const tbody = document.querySelector('#' + tableId + ' tbody');
  tbody.innerHTML = rows.map(cells =>
    '<tr>' + cells.map(c => '<td>' + String(c) + '</td>').join('') + '</tr>'
  ).join('');
}
async function refresh() {
  const [summary, tools, hourly, recent] = await Promise.all([
    fetchJson('/api/usage'),
    fetchJson('/api/usage/tools'),
    fetchJson('/api/usage/hourly'),
    fetchJson('/api/usage/recent'),
  ]);
  document.getElementById('cards').innerHTML = [
    [summary.totalRequests, 'requests'],
    [summary.totalToolCalls, 'tool calls'],
    [summary.uniqueClients, 'unique clients'],
    [summary.uptime, 'uptime'],
  ].map(([num, label]) =>
    '<div class="card"><div class="num">' + num + '</div><div class="label">' + label + '</div></div>'
  ).join('');
  fill('tools', tools.map(t => [t.tool, t.count, t.percent]));
  fill('hourly', hourly.map(h => [h.hour, h.count]));
  fill('recent', recent.slice(0, 20).map(r => [r.tool, r.timestamp, r.clientIp]));
}
refresh();
setInterval(refresh, 30000);
</script>
</body>
</html>
"#;

/// GET /dashboard — serve the dashboard page.
pub async fn handle_dashboard() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}
