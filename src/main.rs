fn main() {
    logon_lib::run()
}
